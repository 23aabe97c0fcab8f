use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Fixed pauses of the presentation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    pub pre_display: Duration,
    pub digit_display: Duration,
    pub inter_digit_gap: Duration,
    pub post_display: Duration,
    pub practice_feedback: Duration,
}

impl Default for TaskTiming {
    fn default() -> Self {
        Self {
            pre_display: Duration::from_millis(500),
            digit_display: Duration::from_millis(1000),
            inter_digit_gap: Duration::from_millis(500),
            post_display: Duration::from_millis(500),
            practice_feedback: Duration::from_millis(2000),
        }
    }
}

impl TaskTiming {
    pub fn with_digit_display(mut self, digit_display: Duration) -> Self {
        self.digit_display = digit_display;
        self
    }

    pub fn with_inter_digit_gap(mut self, gap: Duration) -> Self {
        self.inter_digit_gap = gap;
        self
    }

    /// Time from the start of a reveal until input opens, for `length` digits.
    pub fn presentation_duration(&self, length: usize) -> Duration {
        let gaps = length.saturating_sub(1) as u32;
        self.pre_display
            + self.digit_display * length as u32
            + self.inter_digit_gap * gaps
            + self.post_display
    }
}

/// Receives the currently visible digit; `None` clears the display.
pub trait DigitDisplay: Send + Sync {
    fn show(&self, digit: Option<u8>);
}

impl<F> DigitDisplay for F
where
    F: Fn(Option<u8>) + Send + Sync,
{
    fn show(&self, digit: Option<u8>) {
        self(digit)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PresentationScheduler {
    timing: TaskTiming,
}

impl PresentationScheduler {
    pub fn new(timing: TaskTiming) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> &TaskTiming {
        &self.timing
    }

    /// Shows `digits` one at a time and returns the instant the input window opens.
    ///
    /// Returns `None` as soon as `cancel` fires; nothing is shown after that point.
    pub async fn reveal<D>(
        &self,
        digits: &[u8],
        display: &D,
        cancel: &CancellationToken,
    ) -> Option<Instant>
    where
        D: DigitDisplay + ?Sized,
    {
        pause(self.timing.pre_display, cancel).await?;

        for (position, digit) in digits.iter().enumerate() {
            display.show(Some(*digit));
            pause(self.timing.digit_display, cancel).await?;
            display.show(None);

            if position + 1 < digits.len() {
                pause(self.timing.inter_digit_gap, cancel).await?;
            }
        }

        pause(self.timing.post_display, cancel).await?;

        if cancel.is_cancelled() {
            return None;
        }
        Some(Instant::now())
    }

    /// Dwell on practice feedback. `false` when cancelled.
    pub async fn hold_feedback(&self, cancel: &CancellationToken) -> bool {
        pause(self.timing.practice_feedback, cancel).await.is_some()
    }
}

async fn pause(duration: Duration, cancel: &CancellationToken) -> Option<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        _ = sleep(duration) => Some(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingDisplay {
        started: Instant,
        events: Mutex<Vec<(Duration, Option<u8>)>>,
    }

    impl RecordingDisplay {
        fn starting_now() -> Self {
            Self {
                started: Instant::now(),
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<(Duration, Option<u8>)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl DigitDisplay for RecordingDisplay {
        fn show(&self, digit: Option<u8>) {
            self.events
                .lock()
                .unwrap()
                .push((self.started.elapsed(), digit));
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test(start_paused = true)]
    async fn three_digits_open_input_after_five_seconds() {
        let scheduler = PresentationScheduler::new(TaskTiming::default());
        let display = RecordingDisplay::starting_now();
        let cancel = CancellationToken::new();
        let begin = Instant::now();

        let input_at = scheduler
            .reveal(&[4, 7, 1], &display, &cancel)
            .await
            .expect("not cancelled");

        assert_eq!(input_at - begin, ms(500 + 3 * 1000 + 2 * 500 + 500));
        assert_eq!(input_at - begin, scheduler.timing().presentation_duration(3));
    }

    #[tokio::test(start_paused = true)]
    async fn digits_are_shown_one_at_a_time() {
        let scheduler = PresentationScheduler::new(TaskTiming::default());
        let display = RecordingDisplay::starting_now();
        let cancel = CancellationToken::new();

        scheduler.reveal(&[2, 8], &display, &cancel).await;

        assert_eq!(
            display.events(),
            vec![
                (ms(500), Some(2)),
                (ms(1500), None),
                (ms(2000), Some(8)),
                (ms(3000), None),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn digit_display_time_is_configurable() {
        let timing = TaskTiming::default().with_digit_display(ms(750));
        let scheduler = PresentationScheduler::new(timing);
        let cancel = CancellationToken::new();
        let begin = Instant::now();

        let input_at = scheduler
            .reveal(&[1, 2, 3, 4], &|_: Option<u8>| {}, &cancel)
            .await
            .unwrap();

        assert_eq!(input_at - begin, ms(500 + 4 * 750 + 3 * 500 + 500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_pending_reveal() {
        let scheduler = PresentationScheduler::new(TaskTiming::default());
        let display = Arc::new(RecordingDisplay::starting_now());
        let cancel = CancellationToken::new();

        let task = {
            let display = display.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.reveal(&[5, 2, 9], &*display, &cancel).await })
        };

        sleep(ms(1200)).await;
        cancel.cancel();

        assert!(task.await.unwrap().is_none());
        sleep(ms(10_000)).await;
        assert_eq!(display.events(), vec![(ms(500), Some(5))]);
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_dwell_honours_cancellation() {
        let scheduler = PresentationScheduler::default();
        let cancel = CancellationToken::new();
        let begin = Instant::now();

        assert!(scheduler.hold_feedback(&cancel).await);
        assert_eq!(begin.elapsed(), ms(2000));

        cancel.cancel();
        assert!(!scheduler.hold_feedback(&cancel).await);
    }

    #[test]
    fn presentation_duration_for_single_digit_has_no_gap() {
        let timing = TaskTiming::default();
        assert_eq!(timing.presentation_duration(1), ms(2000));
        assert_eq!(
            timing.with_inter_digit_gap(ms(1000)).presentation_duration(3),
            ms(6000)
        );
    }
}
