use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::trial::{TaskPhase, TaskResult, TrialResult};

/// One of the two counterbalanced stimulus sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Series {
    #[serde(rename = "seriesA")]
    SeriesA,
    #[serde(rename = "seriesB")]
    SeriesB,
}

impl Series {
    pub fn as_str(&self) -> &'static str {
        match self {
            Series::SeriesA => "seriesA",
            Series::SeriesB => "seriesB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentMode {
    Test,
    #[default]
    Full,
}

impl ExperimentMode {
    pub fn is_test(&self) -> bool {
        matches!(self, ExperimentMode::Test)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentMode::Test => "test",
            ExperimentMode::Full => "full",
        }
    }
}

/// Series and music setting for one task of the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCondition {
    pub series: Series,
    pub with_music: bool,
}

impl TaskCondition {
    const fn new(series: Series, with_music: bool) -> Self {
        Self { series, with_music }
    }

    pub fn label(&self) -> String {
        let music = if self.with_music { "music" } else { "silence" };
        format!("{}-{}", self.series.as_str(), music)
    }
}

/// Counterbalanced ordering of the two tasks a participant receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencePlan {
    A,
    B,
    #[serde(rename = "B_NO_MUSIC")]
    BNoMusic,
}

impl SequencePlan {
    pub fn conditions(&self) -> [TaskCondition; 2] {
        match self {
            SequencePlan::A => [
                TaskCondition::new(Series::SeriesA, true),
                TaskCondition::new(Series::SeriesB, false),
            ],
            SequencePlan::B => [
                TaskCondition::new(Series::SeriesB, true),
                TaskCondition::new(Series::SeriesA, false),
            ],
            SequencePlan::BNoMusic => [
                TaskCondition::new(Series::SeriesB, false),
                TaskCondition::new(Series::SeriesA, true),
            ],
        }
    }

    pub fn starts_with_music(&self) -> bool {
        self.conditions()[0].with_music
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequencePlan::A => "A",
            SequencePlan::B => "B",
            SequencePlan::BNoMusic => "B_NO_MUSIC",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SequencePlan::A => "Series A with music, then Series B without music",
            SequencePlan::B => "Series B with music, then Series A without music",
            SequencePlan::BNoMusic => "Series B without music, then Series A with music",
        }
    }

    /// Local 50/50 choice used when the assignment service is unavailable.
    pub fn random_fallback<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.random_bool(0.5) {
            SequencePlan::A
        } else {
            SequencePlan::B
        }
    }
}

/// Result of the counterbalancing counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceAssignment {
    pub sequence: SequencePlan,
    pub experiment_number: i64,
    pub start_with_music: bool,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl SequenceAssignment {
    /// Even counts get `A`, odd counts get `B_NO_MUSIC`.
    pub fn for_count(experiment_number: i64) -> Self {
        let sequence = if experiment_number % 2 == 0 {
            SequencePlan::A
        } else {
            SequencePlan::BNoMusic
        };
        Self {
            sequence,
            experiment_number,
            start_with_music: sequence.starts_with_music(),
            description: sequence.description().to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExperimentStage {
    Task,
    Transition,
    Completed,
}

impl ExperimentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Transition => "transition",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ExperimentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one task instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub phase: TaskPhase,
    pub trial_index: usize,
    pub trial_count: usize,
    pub visible_digit: Option<u8>,
    pub is_practice: bool,
    pub last_result: Option<TrialResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    pub task_index: usize,
    pub condition: TaskCondition,
    pub result: TaskResult,
}

/// Serializable view of an experiment, also what gets persisted to the state store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSnapshot {
    pub experiment_id: String,
    pub participant_id: String,
    pub mode: ExperimentMode,
    pub sequence: SequencePlan,
    pub stage: ExperimentStage,
    pub current_task_index: usize,
    pub task_count: usize,
    pub condition: Option<TaskCondition>,
    pub task: Option<TaskSnapshot>,
    pub completed_tasks: Vec<CompletedTask>,
    pub result_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExperimentRequest {
    pub participant_id: Option<String>,
    pub mode: Option<ExperimentMode>,
    pub digit_display_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseRequest {
    pub response: String,
}

/// Events pushed to the browser over SSE.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExperimentEvent {
    Phase(PhaseChanged),
    Digit(DigitShown),
    PracticeComplete(TaskMarker),
    TaskComplete(TaskCompleted),
    AudioStart(AudioStarted),
    AudioStop(AudioStopped),
    Transition(TransitionReady),
    ExperimentComplete(ExperimentCompleted),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChanged {
    pub task_index: usize,
    pub phase: TaskPhase,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitShown {
    pub task_index: usize,
    /// `None` clears the display.
    pub digit: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMarker {
    pub task_index: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompleted {
    pub task_index: usize,
    pub total_trials: u32,
    pub correct_trials: u32,
    pub accuracy: f64,
    pub discontinued: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStarted {
    pub track_url: String,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub volume: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStopped {
    pub track_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionReady {
    pub next_task_index: usize,
    pub next_condition: TaskCondition,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentCompleted {
    pub experiment_id: String,
    pub total_trials: u32,
    pub correct_trials: u32,
    pub accuracy: f64,
    pub result_id: Option<String>,
}

impl ExperimentEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ExperimentEvent::Phase(_) => "phase",
            ExperimentEvent::Digit(_) => "digit",
            ExperimentEvent::PracticeComplete(_) => "practice-complete",
            ExperimentEvent::TaskComplete(_) => "task-complete",
            ExperimentEvent::AudioStart(_) => "audio-start",
            ExperimentEvent::AudioStop(_) => "audio-stop",
            ExperimentEvent::Transition(_) => "transition",
            ExperimentEvent::ExperimentComplete(_) => "experiment-complete",
        }
    }
}
