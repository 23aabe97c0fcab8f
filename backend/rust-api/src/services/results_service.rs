use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::metrics::{track_db_operation, RESULT_SUBMISSIONS_TOTAL};
use crate::models::{
    accuracy_percent, DigitSpanRecord, Direction, ExperimentMode, PassFailLedger,
    ResultSubmission, TrialResult,
};
use crate::utils::time::chrono_to_bson;

pub const COLLECTION: &str = "digitSpan";
pub const RECENT_LIMIT: i64 = 10;

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert(&self, record: &DigitSpanRecord) -> Result<()>;

    async fn recent(&self, limit: i64) -> Result<Vec<DigitSpanRecord>>;

    async fn by_participant(&self, participant_id: &str) -> Result<Vec<DigitSpanRecord>>;
}

pub struct MongoResultStore {
    collection: Collection<DigitSpanRecord>,
}

impl MongoResultStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection::<DigitSpanRecord>(COLLECTION),
        }
    }
}

#[async_trait]
impl ResultStore for MongoResultStore {
    async fn insert(&self, record: &DigitSpanRecord) -> Result<()> {
        track_db_operation("insert_one", COLLECTION, async {
            self.collection
                .insert_one(record)
                .await
                .context("Failed to insert digit span result")?;
            Ok(())
        })
        .await
    }

    async fn recent(&self, limit: i64) -> Result<Vec<DigitSpanRecord>> {
        track_db_operation("find", COLLECTION, async {
            let cursor = self
                .collection
                .find(doc! {})
                .sort(doc! { "createdAt": -1 })
                .limit(limit)
                .await
                .context("Failed to query digit span results")?;

            cursor
                .try_collect()
                .await
                .map_err(|e| anyhow!("Digit span result query failed: {}", e))
        })
        .await
    }

    async fn by_participant(&self, participant_id: &str) -> Result<Vec<DigitSpanRecord>> {
        track_db_operation("find", COLLECTION, async {
            let cursor = self
                .collection
                .find(doc! { "participantId": participant_id })
                .sort(doc! { "createdAt": -1 })
                .await
                .context("Failed to query participant results")?;

            cursor
                .try_collect()
                .await
                .map_err(|e| anyhow!("Participant result query failed: {}", e))
        })
        .await
    }
}

/// Process-local store used when no database is attached.
#[derive(Default)]
pub struct InMemoryResultStore {
    records: RwLock<Vec<DigitSpanRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first(mut records: Vec<DigitSpanRecord>) -> Vec<DigitSpanRecord> {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn insert(&self, record: &DigitSpanRecord) -> Result<()> {
        self.records
            .write()
            .map_err(|_| anyhow!("Result store lock poisoned"))?
            .push(record.clone());
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<DigitSpanRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("Result store lock poisoned"))?
            .clone();
        let mut sorted = Self::newest_first(records);
        sorted.truncate(limit.max(0) as usize);
        Ok(sorted)
    }

    async fn by_participant(&self, participant_id: &str) -> Result<Vec<DigitSpanRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("Result store lock poisoned"))?
            .iter()
            .filter(|record| record.participant_id == participant_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(records))
    }
}

/// Aggregate handed over by the experiment flow when all tasks are done.
#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    pub participant_id: String,
    pub experiment_mode: ExperimentMode,
    pub sequence: String,
    pub total_trials: u32,
    pub correct_trials: u32,
    pub trial_results: Vec<TrialResult>,
    pub pass_fail_map: PassFailLedger,
}

impl From<ExperimentSummary> for ResultSubmission {
    fn from(summary: ExperimentSummary) -> Self {
        Self {
            participant_id: Some(summary.participant_id),
            total_trials: Some(summary.total_trials),
            correct_trials: Some(summary.correct_trials),
            pass_fail_map: Some(summary.pass_fail_map),
            direction: Some(Direction::Backward),
            experiment_mode: Some(summary.experiment_mode),
            completed: Some(true),
            sequence: Some(summary.sequence),
            session_timestamp: None,
            trial_results: summary.trial_results,
        }
    }
}

#[derive(Clone)]
pub struct ResultsService {
    store: Arc<dyn ResultStore>,
}

impl ResultsService {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Persists one submission. Callers validate required fields first; anything still missing
    /// is an error here.
    pub async fn save(&self, submission: ResultSubmission) -> Result<DigitSpanRecord> {
        let total_trials = submission
            .total_trials
            .ok_or_else(|| anyhow!("totalTrials is required"))?;
        let correct_trials = submission
            .correct_trials
            .ok_or_else(|| anyhow!("correctTrials is required"))?;
        let pass_fail_map = submission
            .pass_fail_map
            .ok_or_else(|| anyhow!("passFailMap is required"))?;
        let direction = submission
            .direction
            .ok_or_else(|| anyhow!("direction is required"))?;
        let experiment_mode = submission
            .experiment_mode
            .ok_or_else(|| anyhow!("experimentMode is required"))?;

        let participant_id = submission
            .participant_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_participant_id);

        let now = Utc::now();
        let record = DigitSpanRecord {
            id: Uuid::new_v4().to_string(),
            participant_id,
            experiment_mode,
            sequence: submission.sequence,
            session_timestamp: chrono_to_bson(submission.session_timestamp.unwrap_or(now)),
            completed_at: chrono_to_bson(now),
            total_trials,
            correct_trials,
            direction,
            completed: submission.completed.unwrap_or(true),
            accuracy: accuracy_percent(correct_trials, total_trials),
            trial_results: submission.trial_results,
            pass_fail_map,
            created_at: chrono_to_bson(now),
            updated_at: chrono_to_bson(now),
        };

        match self.store.insert(&record).await {
            Ok(()) => {
                RESULT_SUBMISSIONS_TOTAL.with_label_values(&["saved"]).inc();
                tracing::info!(
                    participant_id = %record.participant_id,
                    result_id = %record.id,
                    accuracy = record.accuracy,
                    "Digit span result saved"
                );
                Ok(record)
            }
            Err(e) => {
                RESULT_SUBMISSIONS_TOTAL.with_label_values(&["failed"]).inc();
                Err(e)
            }
        }
    }

    pub async fn list_recent(&self) -> Result<Vec<DigitSpanRecord>> {
        self.store.recent(RECENT_LIMIT).await
    }

    pub async fn list_by_participant(&self, participant_id: &str) -> Result<Vec<DigitSpanRecord>> {
        self.store.by_participant(participant_id).await
    }
}

pub fn generate_participant_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("participant_{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(total: u32, correct: u32) -> ResultSubmission {
        ResultSubmission {
            total_trials: Some(total),
            correct_trials: Some(correct),
            pass_fail_map: Some(PassFailLedger::new().record(3, true)),
            direction: Some(Direction::Backward),
            experiment_mode: Some(ExperimentMode::Full),
            ..Default::default()
        }
    }

    #[test]
    fn generated_participant_ids_have_short_suffix() {
        let id = generate_participant_id();
        assert!(id.starts_with("participant_"));
        assert_eq!(id.len(), "participant_".len() + 8);
        assert_ne!(id, generate_participant_id());
    }

    #[tokio::test]
    async fn save_recomputes_accuracy_and_fills_participant() {
        let service = ResultsService::new(Arc::new(InMemoryResultStore::new()));
        let record = service.save(submission(10, 7)).await.unwrap();

        assert_eq!(record.accuracy, 70.0);
        assert!(record.participant_id.starts_with("participant_"));
        assert!(record.completed);
        assert_eq!(record.pass_fail_map.outcomes(3), &[true]);
    }

    #[tokio::test]
    async fn save_without_summary_fields_fails() {
        let service = ResultsService::new(Arc::new(InMemoryResultStore::new()));
        let mut incomplete = submission(4, 2);
        incomplete.pass_fail_map = None;
        assert!(service.save(incomplete).await.is_err());
    }

    #[tokio::test]
    async fn recent_is_capped_and_newest_first() {
        let service = ResultsService::new(Arc::new(InMemoryResultStore::new()));
        for correct in 0..12u32 {
            service.save(submission(12, correct)).await.unwrap();
        }

        let recent = service.list_recent().await.unwrap();
        assert_eq!(recent.len(), RECENT_LIMIT as usize);
        assert!(recent
            .windows(2)
            .all(|pair| pair[0].created_at >= pair[1].created_at));
    }

    #[tokio::test]
    async fn participant_lookup_filters_records() {
        let service = ResultsService::new(Arc::new(InMemoryResultStore::new()));
        let mut mine = submission(6, 6);
        mine.participant_id = Some("participant_abc".to_string());
        service.save(mine.clone()).await.unwrap();
        service.save(mine).await.unwrap();
        service.save(submission(6, 1)).await.unwrap();

        let found = service
            .list_by_participant("participant_abc")
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.participant_id == "participant_abc"));
        assert!(service
            .list_by_participant("participant_none")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn summary_converts_to_complete_submission() {
        let summary = ExperimentSummary {
            participant_id: "p1".to_string(),
            experiment_mode: ExperimentMode::Test,
            sequence: "A".to_string(),
            total_trials: 6,
            correct_trials: 3,
            trial_results: Vec::new(),
            pass_fail_map: PassFailLedger::new(),
        };
        let submission = ResultSubmission::from(summary);
        assert_eq!(submission.completed, Some(true));
        assert_eq!(submission.direction, Some(Direction::Backward));
        assert_eq!(submission.sequence.as_deref(), Some("A"));
    }
}
