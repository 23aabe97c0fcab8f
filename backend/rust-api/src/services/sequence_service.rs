use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::metrics::{track_db_operation, SEQUENCE_ASSIGNMENTS_TOTAL};
use crate::models::SequenceAssignment;

const COLLECTION: &str = "globalState";
const COUNTER_KEY: &str = "experimentCounter";

/// Monotonic experiment counter shared by every server instance.
#[async_trait]
pub trait SequenceCounter: Send + Sync {
    /// Returns the value before the increment, starting at 0.
    async fn next(&self) -> Result<i64>;
}

pub struct MongoSequenceCounter {
    collection: Collection<Document>,
}

impl MongoSequenceCounter {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection::<Document>(COLLECTION),
        }
    }
}

#[async_trait]
impl SequenceCounter for MongoSequenceCounter {
    async fn next(&self) -> Result<i64> {
        let updated = track_db_operation("find_one_and_update", COLLECTION, async {
            self.collection
                .find_one_and_update(
                    doc! { "key": COUNTER_KEY },
                    doc! { "$inc": { "value": 1_i64 } },
                )
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await
                .context("Failed to increment experiment counter")
        })
        .await?
        .ok_or_else(|| anyhow!("Experiment counter upsert returned no document"))?;

        let value = match updated.get("value") {
            Some(mongodb::bson::Bson::Int64(v)) => *v,
            Some(mongodb::bson::Bson::Int32(v)) => i64::from(*v),
            _ => return Err(anyhow!("Experiment counter has no numeric value")),
        };
        Ok(value - 1)
    }
}

#[derive(Default)]
pub struct InMemorySequenceCounter {
    value: AtomicI64,
}

impl InMemorySequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceCounter for InMemorySequenceCounter {
    async fn next(&self) -> Result<i64> {
        Ok(self.value.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone)]
pub struct SequenceService {
    counter: Arc<dyn SequenceCounter>,
}

impl SequenceService {
    pub fn new(counter: Arc<dyn SequenceCounter>) -> Self {
        Self { counter }
    }

    /// Even experiment numbers start with music (`A`), odd ones without (`B_NO_MUSIC`).
    pub async fn next_assignment(&self) -> Result<SequenceAssignment> {
        let experiment_number = self.counter.next().await?;
        let assignment = SequenceAssignment::for_count(experiment_number);

        SEQUENCE_ASSIGNMENTS_TOTAL
            .with_label_values(&[assignment.sequence.as_str()])
            .inc();
        tracing::info!(
            experiment_number,
            sequence = assignment.sequence.as_str(),
            "Assigned counterbalanced sequence"
        );

        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SequencePlan;

    #[tokio::test]
    async fn assignments_alternate_from_zero() {
        let service = SequenceService::new(Arc::new(InMemorySequenceCounter::new()));

        let first = service.next_assignment().await.unwrap();
        let second = service.next_assignment().await.unwrap();
        let third = service.next_assignment().await.unwrap();

        assert_eq!(first.experiment_number, 0);
        assert_eq!(first.sequence, SequencePlan::A);
        assert!(first.start_with_music);
        assert_eq!(second.sequence, SequencePlan::BNoMusic);
        assert!(!second.start_with_music);
        assert_eq!(third.sequence, SequencePlan::A);
    }

    #[tokio::test]
    async fn assignment_serializes_for_the_browser() {
        let service = SequenceService::new(Arc::new(InMemorySequenceCounter::new()));
        let assignment = service.next_assignment().await.unwrap();
        let json = serde_json::to_value(&assignment).unwrap();

        assert_eq!(json["sequence"], "A");
        assert_eq!(json["experimentNumber"], 0);
        assert_eq!(json["startWithMusic"], true);
        assert!(json["description"].as_str().unwrap().contains("music"));
    }
}
