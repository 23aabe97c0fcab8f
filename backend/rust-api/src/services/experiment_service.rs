//! Runs a participant through the counterbalanced pair of tasks.
//!
//! Each experiment owns one task runner at a time, a broadcast stream of browser events and
//! the background-music handle. Task notifications arrive through [`TaskBridge`], which only
//! holds a weak reference so that dropping an experiment tears its runner down.
//!
//! An experiment stays registered until it has been idle for the retention window, finished or
//! not. A finished one stays reachable for snapshots and export until then.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::metrics::{EXPERIMENTS_ACTIVE, EXPERIMENTS_TOTAL, TASKS_TOTAL};
use crate::models::{
    CompletedTask, CreateExperimentRequest, DigitShown, ExperimentCompleted, ExperimentEvent,
    ExperimentMode, ExperimentSnapshot, ExperimentStage, PhaseChanged, SequencePlan,
    TaskCompleted, TaskCondition, TaskMarker, TaskPhase, TaskResult, TransitionReady,
    TrialResult,
};
use crate::services::audio::{AudioHandle, AudioPlayer, AudioSettings, StreamAudioPlayer};
use crate::services::presentation::TaskTiming;
use crate::services::results_service::{generate_participant_id, ExperimentSummary, ResultsService};
use crate::services::sequence_service::SequenceService;
use crate::services::state_store::ExperimentStateStore;
use crate::services::task_controller::{TaskConfig, TaskController};
use crate::services::task_runner::{self, TaskError, TaskHandle, TaskObserver};
use crate::utils::time::epoch_millis;

const EVENT_BUFFER: usize = 256;
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

type Registry = RwLock<HashMap<String, Arc<Experiment>>>;

/// Chooses the counterbalanced ordering for a new participant.
#[async_trait]
pub trait ConditionAssigner: Send + Sync {
    async fn assign(&self) -> Result<SequencePlan>;
}

#[async_trait]
impl ConditionAssigner for SequenceService {
    async fn assign(&self) -> Result<SequencePlan> {
        Ok(self.next_assignment().await?.sequence)
    }
}

/// Receives the aggregated result of a finished experiment and returns its identifier.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn submit(&self, summary: ExperimentSummary) -> Result<String>;
}

#[async_trait]
impl ResultSink for ResultsService {
    async fn submit(&self, summary: ExperimentSummary) -> Result<String> {
        Ok(self.save(summary.into()).await?.id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("experiment {0} not found")]
    NotFound(String),
    #[error("experiment {0} already exists")]
    AlreadyExists(String),
    #[error("experiment is in the {0} stage")]
    WrongStage(ExperimentStage),
    #[error(transparent)]
    Task(#[from] TaskError),
}

#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    pub timing: TaskTiming,
    pub audio: AudioSettings,
    /// Idle time after which an experiment is dropped from memory.
    pub retention: Duration,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            timing: TaskTiming::default(),
            audio: AudioSettings::default(),
            retention: DEFAULT_RETENTION,
        }
    }
}

pub struct ExperimentService {
    experiments: Arc<Registry>,
    assigner: Arc<dyn ConditionAssigner>,
    sink: Arc<dyn ResultSink>,
    state_store: Arc<dyn ExperimentStateStore>,
    settings: ExperimentSettings,
}

impl ExperimentService {
    pub fn new(
        assigner: Arc<dyn ConditionAssigner>,
        sink: Arc<dyn ResultSink>,
        state_store: Arc<dyn ExperimentStateStore>,
        settings: ExperimentSettings,
    ) -> Self {
        Self {
            experiments: Arc::new(RwLock::new(HashMap::new())),
            assigner,
            sink,
            state_store,
            settings,
        }
    }

    pub async fn create_experiment(
        &self,
        request: CreateExperimentRequest,
    ) -> Result<ExperimentSnapshot, ExperimentError> {
        let plan = match self.assigner.assign().await {
            Ok(plan) => plan,
            Err(e) => {
                let fallback = SequencePlan::random_fallback(&mut rand::rng());
                tracing::warn!(
                    "Sequence assignment failed ({}), using local fallback {}",
                    e,
                    fallback.as_str()
                );
                fallback
            }
        };

        let participant_id = request
            .participant_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_participant_id);
        let mode = request.mode.unwrap_or_default();
        let mut timing = self.settings.timing;
        if let Some(ms) = request.digit_display_ms.filter(|ms| *ms > 0) {
            timing = timing.with_digit_display(Duration::from_millis(ms));
        }

        let now = Utc::now();
        let experiment_id = format!("{}-{}", participant_id, epoch_millis(now));
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let experiment = Arc::new(Experiment {
            id: experiment_id.clone(),
            participant_id,
            mode,
            plan,
            timing,
            created_at: now,
            audio: StreamAudioPlayer::new(self.settings.audio.clone(), events.clone()),
            events,
            sink: self.sink.clone(),
            state_store: self.state_store.clone(),
            inner: Mutex::new(ExperimentInner {
                stage: ExperimentStage::Task,
                current_task_index: 0,
                task: None,
                music: None,
                completed_tasks: Vec::new(),
                result_id: None,
                updated_at: now,
                last_activity: Instant::now(),
            }),
        });

        {
            let mut registry = self
                .experiments
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if registry.contains_key(&experiment_id) {
                return Err(ExperimentError::AlreadyExists(experiment_id));
            }
            registry.insert(experiment_id.clone(), experiment.clone());
        }

        experiment.launch_task(0);
        tokio::spawn(evict_when_idle(
            Arc::downgrade(&self.experiments),
            Arc::downgrade(&experiment),
            self.settings.retention,
        ));

        EXPERIMENTS_TOTAL.with_label_values(&["created"]).inc();
        EXPERIMENTS_ACTIVE.inc();
        tracing::info!(
            experiment_id = %experiment.id,
            participant_id = %experiment.participant_id,
            sequence = plan.as_str(),
            mode = mode.as_str(),
            "Experiment created"
        );

        experiment.persist().await;
        Ok(experiment.snapshot())
    }

    pub fn get(&self, experiment_id: &str) -> Result<Arc<Experiment>, ExperimentError> {
        self.experiments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(experiment_id)
            .cloned()
            .ok_or_else(|| ExperimentError::NotFound(experiment_id.to_string()))
    }

    pub fn snapshot(&self, experiment_id: &str) -> Result<ExperimentSnapshot, ExperimentError> {
        Ok(self.get(experiment_id)?.snapshot())
    }

    /// Last snapshot written to the state store, for experiments no longer held in memory.
    pub async fn saved_state(&self, experiment_id: &str) -> Result<Option<serde_json::Value>> {
        self.state_store.load(experiment_id).await
    }

    pub fn subscribe(
        &self,
        experiment_id: &str,
    ) -> Result<broadcast::Receiver<ExperimentEvent>, ExperimentError> {
        Ok(self.get(experiment_id)?.events.subscribe())
    }

    /// Leaves the instructions screen of the current task.
    pub async fn start_task(
        &self,
        experiment_id: &str,
    ) -> Result<ExperimentSnapshot, ExperimentError> {
        let experiment = self.get(experiment_id)?;
        let handle = experiment.active_task()?;
        experiment.touch();
        handle.start().await?;
        Ok(experiment.snapshot())
    }

    pub async fn submit_response(
        &self,
        experiment_id: &str,
        raw: &str,
    ) -> Result<TrialResult, ExperimentError> {
        let experiment = self.get(experiment_id)?;
        let handle = experiment.active_task()?;
        experiment.touch();
        Ok(handle.submit(raw).await?)
    }

    /// Leaves the transition screen and starts the next task without instructions.
    pub async fn continue_experiment(
        &self,
        experiment_id: &str,
    ) -> Result<ExperimentSnapshot, ExperimentError> {
        let experiment = self.get(experiment_id)?;
        let next = {
            let inner = experiment.lock();
            if inner.stage != ExperimentStage::Transition {
                return Err(ExperimentError::WrongStage(inner.stage));
            }
            inner.completed_tasks.len()
        };

        experiment.launch_task(next);
        experiment.persist().await;
        Ok(experiment.snapshot())
    }

    pub async fn abandon(&self, experiment_id: &str) -> Result<(), ExperimentError> {
        let experiment = self
            .experiments
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(experiment_id)
            .ok_or_else(|| ExperimentError::NotFound(experiment_id.to_string()))?;

        experiment.release("abandoned").await;
        tracing::info!(experiment_id = %experiment_id, "Experiment abandoned");
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.experiments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

pub struct Experiment {
    id: String,
    participant_id: String,
    mode: ExperimentMode,
    plan: SequencePlan,
    timing: TaskTiming,
    created_at: DateTime<Utc>,
    events: broadcast::Sender<ExperimentEvent>,
    audio: StreamAudioPlayer,
    sink: Arc<dyn ResultSink>,
    state_store: Arc<dyn ExperimentStateStore>,
    inner: Mutex<ExperimentInner>,
}

struct ExperimentInner {
    stage: ExperimentStage,
    current_task_index: usize,
    task: Option<TaskHandle>,
    music: Option<Arc<AudioHandle>>,
    completed_tasks: Vec<CompletedTask>,
    result_id: Option<String>,
    updated_at: DateTime<Utc>,
    last_activity: Instant,
}

impl ExperimentInner {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.last_activity = Instant::now();
    }
}

/// What has to happen off the runner task once a task finishes.
enum AfterTask {
    Persist,
    Submit(ExperimentSummary),
}

impl Experiment {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn plan(&self) -> SequencePlan {
        self.plan
    }

    pub fn mode(&self) -> ExperimentMode {
        self.mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> MutexGuard<'_, ExperimentInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: ExperimentEvent) {
        let _ = self.events.send(event);
    }

    fn condition(&self, task_index: usize) -> Option<TaskCondition> {
        self.plan.conditions().get(task_index).copied()
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        let inner = self.lock();
        ExperimentSnapshot {
            experiment_id: self.id.clone(),
            participant_id: self.participant_id.clone(),
            mode: self.mode,
            sequence: self.plan,
            stage: inner.stage,
            current_task_index: inner.current_task_index,
            task_count: self.plan.conditions().len(),
            condition: self.condition(inner.current_task_index),
            task: inner.task.as_ref().map(TaskHandle::snapshot),
            completed_tasks: inner.completed_tasks.clone(),
            result_id: inner.result_id.clone(),
            created_at: self.created_at,
            updated_at: inner.updated_at,
        }
    }

    pub fn completed_tasks(&self) -> Vec<CompletedTask> {
        self.lock().completed_tasks.clone()
    }

    fn touch(&self) {
        self.lock().touch();
    }

    fn idle_deadline(&self, retention: Duration) -> Instant {
        self.lock().last_activity + retention
    }

    /// Stops the runner and the music and drops the saved state. Unfinished experiments are
    /// counted under `status`.
    async fn release(&self, status: &str) {
        let finished = {
            let mut inner = self.lock();
            if let Some(task) = inner.task.take() {
                task.cancel();
            }
            if let Some(music) = inner.music.take() {
                self.audio.stop(&music);
            }
            inner.stage == ExperimentStage::Completed
        };

        if !finished {
            EXPERIMENTS_TOTAL.with_label_values(&[status]).inc();
            EXPERIMENTS_ACTIVE.dec();
            TASKS_TOTAL.with_label_values(&["abandoned"]).inc();
        }
        if let Err(e) = self.state_store.clear(&self.id).await {
            tracing::warn!(experiment_id = %self.id, "Failed to clear saved state: {}", e);
        }
    }

    fn active_task(&self) -> Result<TaskHandle, ExperimentError> {
        let inner = self.lock();
        if inner.stage != ExperimentStage::Task {
            return Err(ExperimentError::WrongStage(inner.stage));
        }
        inner
            .task
            .clone()
            .ok_or(ExperimentError::WrongStage(inner.stage))
    }

    fn launch_task(self: &Arc<Self>, task_index: usize) {
        let Some(condition) = self.condition(task_index) else {
            tracing::error!(
                experiment_id = %self.id,
                task_index,
                "No condition for task index, not launching"
            );
            return;
        };
        let first = task_index == 0;

        let controller = TaskController::new(
            TaskConfig {
                trial_sequence: None,
                series: condition.series,
                test_mode: self.mode.is_test(),
                digit_display_ms: self.timing.digit_display.as_millis() as u64,
                is_first_task: first,
                show_instructions: first,
            },
            &mut rand::rng(),
        );
        let bridge = Arc::new(TaskBridge {
            experiment: Arc::downgrade(self),
            task_index,
            condition,
        });

        let mut inner = self.lock();
        inner.stage = ExperimentStage::Task;
        inner.current_task_index = task_index;
        inner.touch();
        inner.task = Some(task_runner::spawn(controller, self.timing, bridge));

        // the first task waits for practice to finish before the music starts
        if condition.with_music && !first && inner.music.is_none() {
            inner.music = Some(self.audio.start());
        }

        TASKS_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!(
            experiment_id = %self.id,
            task_index,
            condition = %condition.label(),
            "Task launched"
        );
    }

    fn start_music_after_practice(&self, task_index: usize, condition: TaskCondition) {
        if task_index != 0 || !condition.with_music {
            return;
        }
        let mut inner = self.lock();
        if inner.music.is_none() {
            inner.music = Some(self.audio.start());
        }
    }

    fn complete_task(
        &self,
        task_index: usize,
        condition: TaskCondition,
        result: TaskResult,
    ) -> AfterTask {
        let mut inner = self.lock();
        if let Some(music) = inner.music.take() {
            self.audio.stop(&music);
        }

        TASKS_TOTAL
            .with_label_values(&[if result.discontinued {
                "discontinued"
            } else {
                "completed"
            }])
            .inc();
        self.publish(ExperimentEvent::TaskComplete(TaskCompleted {
            task_index,
            total_trials: result.total_trials,
            correct_trials: result.correct_trials,
            accuracy: result.accuracy,
            discontinued: result.discontinued,
        }));

        inner.completed_tasks.push(CompletedTask {
            task_index,
            condition,
            result,
        });
        inner.touch();

        let next_task_index = task_index + 1;
        if let Some(next_condition) = self.condition(next_task_index) {
            inner.stage = ExperimentStage::Transition;
            self.publish(ExperimentEvent::Transition(TransitionReady {
                next_task_index,
                next_condition,
            }));
            return AfterTask::Persist;
        }

        inner.stage = ExperimentStage::Completed;
        AfterTask::Submit(aggregate(
            &self.participant_id,
            self.mode,
            self.plan,
            &inner.completed_tasks,
        ))
    }

    async fn after_task(self: Arc<Self>, next: AfterTask) {
        match next {
            AfterTask::Persist => self.persist().await,
            AfterTask::Submit(summary) => self.finalize(summary).await,
        }
    }

    /// Submission is best-effort: a failure is logged and the experiment still completes.
    async fn finalize(&self, summary: ExperimentSummary) {
        let total_trials = summary.total_trials;
        let correct_trials = summary.correct_trials;
        let accuracy = crate::models::accuracy_percent(correct_trials, total_trials);

        let result_id = if total_trials == 0 {
            tracing::warn!(experiment_id = %self.id, "No scored trials, skipping submission");
            None
        } else {
            match self.sink.submit(summary).await {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::error!(experiment_id = %self.id, "Failed to submit results: {}", e);
                    None
                }
            }
        };

        {
            let mut inner = self.lock();
            inner.result_id = result_id.clone();
            inner.touch();
        }

        EXPERIMENTS_TOTAL.with_label_values(&["completed"]).inc();
        EXPERIMENTS_ACTIVE.dec();
        self.publish(ExperimentEvent::ExperimentComplete(ExperimentCompleted {
            experiment_id: self.id.clone(),
            total_trials,
            correct_trials,
            accuracy,
            result_id,
        }));

        if let Err(e) = self.state_store.clear(&self.id).await {
            tracing::warn!(experiment_id = %self.id, "Failed to clear saved state: {}", e);
        }
        tracing::info!(experiment_id = %self.id, total_trials, accuracy, "Experiment completed");
    }

    async fn persist(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.state_store.save(&snapshot).await {
            tracing::warn!(experiment_id = %self.id, "Failed to save experiment state: {}", e);
        }
    }
}

/// Drops `experiment` from the registry once it has seen no activity for `retention`.
async fn evict_when_idle(
    registry: Weak<Registry>,
    experiment: Weak<Experiment>,
    retention: Duration,
) {
    loop {
        let Some(deadline) = experiment.upgrade().map(|e| e.idle_deadline(retention)) else {
            return;
        };
        tokio::time::sleep_until(deadline).await;

        let (Some(live_registry), Some(idle)) = (registry.upgrade(), experiment.upgrade()) else {
            return;
        };
        if idle.idle_deadline(retention) > Instant::now() {
            continue;
        }

        let removed = {
            let mut map = live_registry
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let registered = map
                .get(&idle.id)
                .is_some_and(|current| Arc::ptr_eq(current, &idle));
            if registered {
                map.remove(&idle.id)
            } else {
                None
            }
        };
        if removed.is_some() {
            idle.release("expired").await;
            tracing::info!(experiment_id = %idle.id, "Idle experiment evicted");
        }
        return;
    }
}

/// Sums totals, concatenates trial results and merges ledgers across tasks.
fn aggregate(
    participant_id: &str,
    mode: ExperimentMode,
    plan: SequencePlan,
    tasks: &[CompletedTask],
) -> ExperimentSummary {
    let mut summary = ExperimentSummary {
        participant_id: participant_id.to_string(),
        experiment_mode: mode,
        sequence: plan.as_str().to_string(),
        total_trials: 0,
        correct_trials: 0,
        trial_results: Vec::new(),
        pass_fail_map: Default::default(),
    };

    for task in tasks {
        summary.total_trials += task.result.total_trials;
        summary.correct_trials += task.result.correct_trials;
        summary
            .trial_results
            .extend(task.result.trial_results.iter().cloned());
        summary.pass_fail_map = summary.pass_fail_map.merge(&task.result.pass_fail_map);
    }

    summary
}

/// Forwards one task's notifications to its experiment.
struct TaskBridge {
    experiment: Weak<Experiment>,
    task_index: usize,
    condition: TaskCondition,
}

impl TaskObserver for TaskBridge {
    fn on_phase_change(&self, phase: TaskPhase) {
        if let Some(experiment) = self.experiment.upgrade() {
            experiment.publish(ExperimentEvent::Phase(PhaseChanged {
                task_index: self.task_index,
                phase,
            }));
        }
    }

    fn on_digit(&self, digit: Option<u8>) {
        if let Some(experiment) = self.experiment.upgrade() {
            experiment.publish(ExperimentEvent::Digit(DigitShown {
                task_index: self.task_index,
                digit,
            }));
        }
    }

    fn on_practice_complete(&self) {
        if let Some(experiment) = self.experiment.upgrade() {
            experiment.publish(ExperimentEvent::PracticeComplete(TaskMarker {
                task_index: self.task_index,
            }));
            experiment.start_music_after_practice(self.task_index, self.condition);
        }
    }

    fn on_complete(&self, result: &TaskResult) {
        let Some(experiment) = self.experiment.upgrade() else {
            return;
        };
        let next = experiment.complete_task(self.task_index, self.condition, result.clone());
        tokio::spawn(experiment.after_task(next));
    }
}
