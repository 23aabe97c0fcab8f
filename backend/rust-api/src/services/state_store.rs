use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};
use crate::models::ExperimentSnapshot;

fn state_key(experiment_id: &str) -> String {
    format!("digitspan:experiment:{}", experiment_id)
}

/// Resumable experiment snapshots, written best-effort on every stage change.
#[async_trait]
pub trait ExperimentStateStore: Send + Sync {
    async fn save(&self, snapshot: &ExperimentSnapshot) -> Result<()>;

    async fn load(&self, experiment_id: &str) -> Result<Option<serde_json::Value>>;

    async fn clear(&self, experiment_id: &str) -> Result<()>;
}

pub struct RedisStateStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisStateStore {
    pub fn new(redis: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }
}

#[async_trait]
impl ExperimentStateStore for RedisStateStore {
    async fn save(&self, snapshot: &ExperimentSnapshot) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(snapshot)?;
        let key = state_key(&snapshot.experiment_id);

        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&key)
                .arg(self.ttl_seconds)
                .arg(payload)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to save experiment state to Redis")
        })
        .await
    }

    async fn load(&self, experiment_id: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.redis.clone();
        let key = state_key(experiment_id);

        let raw = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&key)
                .query_async::<Option<String>>(&mut conn)
                .await
                .context("Failed to read experiment state from Redis")
        })
        .await?;

        if raw.is_some() {
            record_cache_hit();
        } else {
            record_cache_miss();
        }
        raw.map(|json| serde_json::from_str(&json).context("Corrupt experiment state"))
            .transpose()
    }

    async fn clear(&self, experiment_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = state_key(experiment_id);

        track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to clear experiment state")
        })
        .await
    }
}

#[derive(Default)]
pub struct InMemoryStateStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExperimentStateStore for InMemoryStateStore {
    async fn save(&self, snapshot: &ExperimentSnapshot) -> Result<()> {
        let value = serde_json::to_value(snapshot)?;
        self.entries
            .write()
            .map_err(|_| anyhow!("State store lock poisoned"))?
            .insert(snapshot.experiment_id.clone(), value);
        Ok(())
    }

    async fn load(&self, experiment_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| anyhow!("State store lock poisoned"))?
            .get(experiment_id)
            .cloned())
    }

    async fn clear(&self, experiment_id: &str) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| anyhow!("State store lock poisoned"))?
            .remove(experiment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExperimentMode, ExperimentStage, SequencePlan};
    use chrono::Utc;

    fn snapshot(id: &str) -> ExperimentSnapshot {
        ExperimentSnapshot {
            experiment_id: id.to_string(),
            participant_id: "participant_1".to_string(),
            mode: ExperimentMode::Test,
            sequence: SequencePlan::A,
            stage: ExperimentStage::Task,
            current_task_index: 0,
            task_count: 2,
            condition: None,
            task: None,
            completed_tasks: Vec::new(),
            result_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(state_key("p-1"), "digitspan:experiment:p-1");
    }

    #[tokio::test]
    async fn in_memory_store_round_trip_and_clear() {
        let store = InMemoryStateStore::new();
        store.save(&snapshot("e1")).await.unwrap();

        let loaded = store.load("e1").await.unwrap().expect("saved");
        assert_eq!(loaded["participantId"], "participant_1");
        assert_eq!(loaded["stage"], "task");

        store.clear("e1").await.unwrap();
        assert!(store.load("e1").await.unwrap().is_none());
    }
}
