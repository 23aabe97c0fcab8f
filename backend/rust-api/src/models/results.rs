use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::experiment::ExperimentMode;
use super::trial::{Direction, PassFailLedger, TrialResult};
use crate::utils::time::bson_to_chrono;

/// Body of `POST /api/digit-span/results`.
///
/// The summary fields are optional at the serde level so that a missing field is reported
/// as a validation failure instead of a JSON parse error.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResultSubmission {
    #[validate(length(min = 1, max = 128, message = "participantId must be 1-128 characters"))]
    pub participant_id: Option<String>,
    #[validate(required)]
    pub total_trials: Option<u32>,
    #[validate(required)]
    pub correct_trials: Option<u32>,
    #[validate(required)]
    pub pass_fail_map: Option<PassFailLedger>,
    #[validate(required)]
    pub direction: Option<Direction>,
    #[validate(required)]
    pub experiment_mode: Option<ExperimentMode>,
    pub completed: Option<bool>,
    pub sequence: Option<String>,
    pub session_timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "trialDetails")]
    pub trial_results: Vec<TrialResult>,
}

/// Stored document in the `digitSpan` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitSpanRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub participant_id: String,
    pub experiment_mode: ExperimentMode,
    pub sequence: Option<String>,
    pub session_timestamp: BsonDateTime,
    pub completed_at: BsonDateTime,
    pub total_trials: u32,
    pub correct_trials: u32,
    pub direction: Direction,
    pub completed: bool,
    pub accuracy: f64,
    pub trial_results: Vec<TrialResult>,
    pub pass_fail_map: PassFailLedger,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

/// JSON view of a stored record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitSpanResultView {
    pub id: String,
    pub participant_id: String,
    pub experiment_mode: ExperimentMode,
    pub sequence: Option<String>,
    pub session_timestamp: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_trials: u32,
    pub correct_trials: u32,
    pub direction: Direction,
    pub completed: bool,
    pub accuracy: f64,
    pub trial_results: Vec<TrialResult>,
    pub pass_fail_map: PassFailLedger,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DigitSpanRecord> for DigitSpanResultView {
    fn from(record: DigitSpanRecord) -> Self {
        Self {
            id: record.id,
            participant_id: record.participant_id,
            experiment_mode: record.experiment_mode,
            sequence: record.sequence,
            session_timestamp: bson_to_chrono(record.session_timestamp),
            completed_at: bson_to_chrono(record.completed_at),
            total_trials: record.total_trials,
            correct_trials: record.correct_trials,
            direction: record.direction,
            completed: record.completed,
            accuracy: record.accuracy,
            trial_results: record.trial_results,
            pass_fail_map: record.pass_fail_map,
            created_at: bson_to_chrono(record.created_at),
            updated_at: bson_to_chrono(record.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResultResponse {
    pub success: bool,
    pub message: String,
    pub participant_id: String,
    pub result_id: String,
    pub data: DigitSpanResultView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultListResponse {
    pub success: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    pub data: Vec<DigitSpanResultView>,
}

impl ResultListResponse {
    pub fn new(records: Vec<DigitSpanRecord>, participant_id: Option<String>) -> Self {
        let data: Vec<DigitSpanResultView> = records.into_iter().map(Into::into).collect();
        Self {
            success: true,
            count: data.len(),
            participant_id,
            data,
        }
    }
}
