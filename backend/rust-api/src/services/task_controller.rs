//! Per-task state machine.
//!
//! `instructions -> displaying -> input -> (practice-feedback) -> displaying ... -> complete`
//!
//! The controller has no clock of its own. The caller reports when the presentation has
//! finished (`open_input`) and when the feedback dwell has elapsed (`finish_feedback`); every
//! transition returns the notifications it produced, in order.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{
    PassFailLedger, Series, TaskPhase, TaskResult, TaskSnapshot, Trial, TrialKind, TrialResult,
};
use crate::services::discontinuation::should_discontinue;
use crate::services::response_scorer;
use crate::services::sequence_generator::{generate_trials, SequenceRequest};

pub const DEFAULT_DIGIT_DISPLAY_MS: u64 = 1000;

/// Construction inputs of one task instance.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Overrides the generated trial list when set.
    pub trial_sequence: Option<Vec<Trial>>,
    pub series: Series,
    pub test_mode: bool,
    /// How long each digit stays on screen. Overrides the runner's timing.
    pub digit_display_ms: u64,
    pub is_first_task: bool,
    pub show_instructions: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            trial_sequence: None,
            series: Series::SeriesA,
            test_mode: false,
            digit_display_ms: DEFAULT_DIGIT_DISPLAY_MS,
            is_first_task: true,
            show_instructions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    PhaseChanged(TaskPhase),
    PracticeComplete,
    Completed(TaskResult),
}

#[derive(Debug)]
pub struct TaskController {
    trials: Vec<Trial>,
    test_mode: bool,
    show_instructions: bool,
    digit_display: Duration,
    phase: TaskPhase,
    current: usize,
    results: Vec<TrialResult>,
    ledger: PassFailLedger,
    input_started_at: Option<Instant>,
    practice_announced: bool,
    discontinued: bool,
    final_result: Option<TaskResult>,
}

impl TaskController {
    pub fn new<R: Rng + ?Sized>(config: TaskConfig, rng: &mut R) -> Self {
        let trials = match config.trial_sequence {
            Some(trials) => trials,
            None => generate_trials(
                &SequenceRequest {
                    series: config.series,
                    test_mode: config.test_mode,
                    is_first_task: config.is_first_task,
                },
                rng,
            ),
        };

        Self::from_trials(trials, config.test_mode, config.show_instructions)
            .with_digit_display(Duration::from_millis(config.digit_display_ms))
    }

    pub fn from_trials(trials: Vec<Trial>, test_mode: bool, show_instructions: bool) -> Self {
        Self {
            trials,
            test_mode,
            show_instructions,
            digit_display: Duration::from_millis(DEFAULT_DIGIT_DISPLAY_MS),
            phase: TaskPhase::Instructions,
            current: 0,
            results: Vec::new(),
            ledger: PassFailLedger::new(),
            input_started_at: None,
            practice_announced: false,
            discontinued: false,
            final_result: None,
        }
    }

    pub fn with_digit_display(mut self, digit_display: Duration) -> Self {
        self.digit_display = digit_display;
        self
    }

    pub fn digit_display(&self) -> Duration {
        self.digit_display
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    pub fn shows_instructions(&self) -> bool {
        self.show_instructions
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_trial(&self) -> Option<&Trial> {
        self.trials.get(self.current)
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn results(&self) -> &[TrialResult] {
        &self.results
    }

    pub fn ledger(&self) -> &PassFailLedger {
        &self.ledger
    }

    pub fn final_result(&self) -> Option<&TaskResult> {
        self.final_result.as_ref()
    }

    pub fn snapshot(&self, visible_digit: Option<u8>) -> TaskSnapshot {
        TaskSnapshot {
            phase: self.phase,
            trial_index: self.current,
            trial_count: self.trials.len(),
            visible_digit,
            is_practice: self.current_trial().is_some_and(Trial::is_practice),
            last_result: self.results.last().cloned(),
        }
    }

    /// Leaves the instructions screen. An empty trial list completes immediately.
    pub fn begin(&mut self) -> Vec<TaskEvent> {
        if self.phase != TaskPhase::Instructions {
            return Vec::new();
        }
        if self.trials.is_empty() {
            return self.finalize();
        }
        self.enter(TaskPhase::Displaying)
    }

    /// Presentation of the current trial finished; input opens at `now`.
    pub fn open_input(&mut self, now: Instant) -> Vec<TaskEvent> {
        if self.phase != TaskPhase::Displaying || self.current_trial().is_none() {
            return Vec::new();
        }
        self.input_started_at = Some(now);
        self.enter(TaskPhase::Input)
    }

    /// Scores `raw` against the current trial. `None` outside the input phase.
    pub fn submit(&mut self, raw: &str, now: Instant) -> Option<(TrialResult, Vec<TaskEvent>)> {
        if self.phase != TaskPhase::Input {
            return None;
        }
        let trial = self.trials.get(self.current)?;
        let result =
            response_scorer::score(trial, self.current, raw, self.input_started_at, now);
        let kind = trial.kind();
        let span = trial.span();

        self.results.push(result.clone());
        self.input_started_at = None;

        let events = match kind {
            TrialKind::Practice => self.enter(TaskPhase::PracticeFeedback),
            TrialKind::Training => self.advance(),
            TrialKind::Main => {
                self.ledger = self.ledger.record(span, result.is_correct);
                if should_discontinue(&self.ledger, self.test_mode, span) {
                    tracing::debug!(length = span, "Both trials of the pair failed, stopping");
                    self.discontinued = true;
                    self.finalize()
                } else {
                    self.advance()
                }
            }
        };

        Some((result, events))
    }

    /// Feedback dwell elapsed.
    pub fn finish_feedback(&mut self) -> Vec<TaskEvent> {
        if self.phase != TaskPhase::PracticeFeedback {
            return Vec::new();
        }
        self.advance()
    }

    fn advance(&mut self) -> Vec<TaskEvent> {
        let next = self.current + 1;
        let Some(upcoming) = self.trials.get(next) else {
            return self.finalize();
        };

        let leaving_practice = self
            .current_trial()
            .is_some_and(Trial::is_practice)
            && !upcoming.is_practice();

        self.current = next;

        let mut events = Vec::with_capacity(2);
        if leaving_practice && !self.practice_announced {
            self.practice_announced = true;
            events.push(TaskEvent::PracticeComplete);
        }
        events.extend(self.enter(TaskPhase::Displaying));
        events
    }

    fn enter(&mut self, phase: TaskPhase) -> Vec<TaskEvent> {
        self.phase = phase;
        vec![TaskEvent::PhaseChanged(phase)]
    }

    fn finalize(&mut self) -> Vec<TaskEvent> {
        let result =
            TaskResult::summarize(self.results.clone(), self.ledger.clone(), self.discontinued);
        self.final_result = Some(result.clone());

        let mut events = self.enter(TaskPhase::Complete);
        events.push(TaskEvent::Completed(result));
        events
    }
}
