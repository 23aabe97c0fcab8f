use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::metrics::TRIALS_SCORED_TOTAL;
use crate::models::{TaskPhase, TaskResult, TaskSnapshot, TrialResult};
use crate::services::presentation::{DigitDisplay, PresentationScheduler, TaskTiming};
use crate::services::task_controller::{TaskController, TaskEvent};

const COMMAND_BUFFER: usize = 16;

/// Fire-and-forget notifications from a running task.
pub trait TaskObserver: Send + Sync {
    fn on_phase_change(&self, phase: TaskPhase);

    fn on_digit(&self, _digit: Option<u8>) {}

    fn on_practice_complete(&self);

    fn on_complete(&self, result: &TaskResult);
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task is not accepting input during the {phase} phase")]
    NotAcceptingInput { phase: TaskPhase },
    #[error("task runner has stopped")]
    Closed,
}

enum Command {
    Start {
        reply: oneshot::Sender<TaskPhase>,
    },
    Submit {
        raw: String,
        reply: oneshot::Sender<Result<TrialResult, TaskError>>,
    },
}

/// Cloneable handle to a running task. The task is cancelled when the last handle is dropped.
#[derive(Clone)]
pub struct TaskHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<TaskSnapshot>,
    cancel: CancellationToken,
    _guard: Arc<DropGuard>,
}

impl TaskHandle {
    /// Leaves the instructions screen. Returns the phase after the command was handled.
    pub async fn start(&self) -> Result<TaskPhase, TaskError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start { reply })
            .await
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())
    }

    pub async fn submit(&self, raw: impl Into<String>) -> Result<TrialResult, TaskError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                raw: raw.into(),
                reply,
            })
            .await
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())?
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.snapshot.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn closed(&self) -> TaskError {
        let phase = self.snapshot.borrow().phase;
        if phase == TaskPhase::Complete {
            TaskError::NotAcceptingInput { phase }
        } else {
            TaskError::Closed
        }
    }
}

/// Moves `controller` onto its own tokio task and drives its timed phases.
///
/// Pauses and gaps come from `timing`; the digit display time comes from the controller.
pub fn spawn(
    controller: TaskController,
    timing: TaskTiming,
    observer: Arc<dyn TaskObserver>,
) -> TaskHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot(None));
    let cancel = CancellationToken::new();
    let scheduler =
        PresentationScheduler::new(timing.with_digit_display(controller.digit_display()));

    let runner = TaskRunner {
        controller,
        scheduler,
        observer,
        commands: command_rx,
        snapshot: snapshot_tx,
        cancel: cancel.clone(),
    };
    tokio::spawn(runner.run());

    TaskHandle {
        commands: command_tx,
        snapshot: snapshot_rx,
        _guard: Arc::new(cancel.clone().drop_guard()),
        cancel,
    }
}

struct TaskRunner {
    controller: TaskController,
    scheduler: PresentationScheduler,
    observer: Arc<dyn TaskObserver>,
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<TaskSnapshot>,
    cancel: CancellationToken,
}

/// Publishes the visible digit to the snapshot and the observer.
struct ObservedDisplay<'a> {
    observer: &'a dyn TaskObserver,
    snapshot: &'a watch::Sender<TaskSnapshot>,
}

impl DigitDisplay for ObservedDisplay<'_> {
    fn show(&self, digit: Option<u8>) {
        self.snapshot
            .send_modify(|snapshot| snapshot.visible_digit = digit);
        self.observer.on_digit(digit);
    }
}

impl TaskRunner {
    async fn run(mut self) {
        if !self.controller.shows_instructions() {
            let events = self.controller.begin();
            self.dispatch(events);
        }

        loop {
            let keep_going = match self.controller.phase() {
                TaskPhase::Instructions => self.await_start().await,
                TaskPhase::Displaying => self.present_current().await,
                TaskPhase::Input => self.await_response().await,
                TaskPhase::PracticeFeedback => self.hold_feedback().await,
                TaskPhase::Complete => false,
            };
            if !keep_going {
                break;
            }
        }

        tracing::debug!(
            phase = %self.controller.phase(),
            cancelled = self.cancel.is_cancelled(),
            "Task runner stopped"
        );
    }

    async fn await_start(&mut self) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                command = self.commands.recv() => match command {
                    None => return false,
                    Some(Command::Start { reply }) => {
                        let events = self.controller.begin();
                        self.dispatch(events);
                        let _ = reply.send(self.controller.phase());
                        return true;
                    }
                    Some(other) => reject(other, TaskPhase::Instructions),
                },
            }
        }
    }

    async fn present_current(&mut self) -> bool {
        let Some(digits) = self.controller.current_trial().map(|t| t.digits().to_vec()) else {
            return false;
        };

        let opened = {
            let display = ObservedDisplay {
                observer: self.observer.as_ref(),
                snapshot: &self.snapshot,
            };
            let reveal = self.scheduler.reveal(&digits, &display, &self.cancel);
            tokio::pin!(reveal);

            loop {
                tokio::select! {
                    opened = &mut reveal => break opened,
                    Some(command) = self.commands.recv() => reject(command, TaskPhase::Displaying),
                }
            }
        };

        match opened {
            Some(at) => {
                let events = self.controller.open_input(at);
                self.dispatch(events);
                true
            }
            None => false,
        }
    }

    async fn await_response(&mut self) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                command = self.commands.recv() => match command {
                    None => return false,
                    Some(Command::Start { reply }) => {
                        let _ = reply.send(TaskPhase::Input);
                    }
                    Some(Command::Submit { raw, reply }) => {
                        match self.controller.submit(&raw, Instant::now()) {
                            Some((result, events)) => {
                                TRIALS_SCORED_TOTAL
                                    .with_label_values(&[
                                        result.trial_kind.as_str(),
                                        if result.is_correct { "true" } else { "false" },
                                    ])
                                    .inc();
                                self.dispatch(events);
                                let _ = reply.send(Ok(result));
                                return true;
                            }
                            None => {
                                let phase = self.controller.phase();
                                let _ = reply.send(Err(TaskError::NotAcceptingInput { phase }));
                            }
                        }
                    }
                },
            }
        }
    }

    async fn hold_feedback(&mut self) -> bool {
        let finished = {
            let dwell = self.scheduler.hold_feedback(&self.cancel);
            tokio::pin!(dwell);

            loop {
                tokio::select! {
                    finished = &mut dwell => break finished,
                    Some(command) = self.commands.recv() => {
                        reject(command, TaskPhase::PracticeFeedback)
                    }
                }
            }
        };

        if !finished {
            return false;
        }
        let events = self.controller.finish_feedback();
        self.dispatch(events);
        true
    }

    /// Publishes the new snapshot, then notifies the observer. Silent once cancelled.
    fn dispatch(&self, events: Vec<TaskEvent>) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.snapshot.send_replace(self.controller.snapshot(None));

        for event in events {
            match event {
                TaskEvent::PhaseChanged(phase) => self.observer.on_phase_change(phase),
                TaskEvent::PracticeComplete => self.observer.on_practice_complete(),
                TaskEvent::Completed(result) => self.observer.on_complete(&result),
            }
        }
    }
}

fn reject(command: Command, phase: TaskPhase) {
    match command {
        Command::Start { reply } => {
            let _ = reply.send(phase);
        }
        Command::Submit { reply, .. } => {
            let _ = reply.send(Err(TaskError::NotAcceptingInput { phase }));
        }
    }
}
