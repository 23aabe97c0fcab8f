use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::models::{AudioStarted, AudioStopped, ExperimentEvent};

pub const PLAYBACK_VOLUME: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSettings {
    pub track_count: u32,
    pub track_base_url: String,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            track_count: 22,
            track_base_url: "/dudu".to_string(),
        }
    }
}

impl AudioSettings {
    pub fn track_url(&self, track: u32) -> String {
        format!("{}/{}.wav", self.track_base_url.trim_end_matches('/'), track)
    }
}

/// A started background track. Stopping is one-shot.
#[derive(Debug)]
pub struct AudioHandle {
    track_url: String,
    stopped: AtomicBool,
}

impl AudioHandle {
    pub fn new(track_url: impl Into<String>) -> Self {
        Self {
            track_url: track_url.into(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn track_url(&self) -> &str {
        &self.track_url
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// `true` only for the call that actually stopped the track.
    fn mark_stopped(&self) -> bool {
        !self.stopped.swap(true, Ordering::AcqRel)
    }
}

/// Best-effort looping playback. Neither call may block or fail the task flow.
pub trait AudioPlayer: Send + Sync {
    fn start(&self) -> Arc<AudioHandle>;

    fn stop(&self, handle: &AudioHandle);
}

/// Plays audio in the participant's browser by publishing events on the experiment stream.
pub struct StreamAudioPlayer {
    settings: AudioSettings,
    events: broadcast::Sender<ExperimentEvent>,
}

impl StreamAudioPlayer {
    pub fn new(settings: AudioSettings, events: broadcast::Sender<ExperimentEvent>) -> Self {
        Self { settings, events }
    }

    fn publish(&self, event: ExperimentEvent) {
        // no subscribers is fine, the snapshot still reflects the state
        let _ = self.events.send(event);
    }
}

impl AudioPlayer for StreamAudioPlayer {
    fn start(&self) -> Arc<AudioHandle> {
        let track = rand::rng().random_range(1..=self.settings.track_count.max(1));
        let handle = Arc::new(AudioHandle::new(self.settings.track_url(track)));

        tracing::info!(track_url = %handle.track_url(), "Starting background music");
        self.publish(ExperimentEvent::AudioStart(AudioStarted {
            track_url: handle.track_url().to_string(),
            looping: true,
            volume: PLAYBACK_VOLUME,
        }));

        handle
    }

    fn stop(&self, handle: &AudioHandle) {
        if !handle.mark_stopped() {
            return;
        }

        tracing::info!(track_url = %handle.track_url(), "Stopping background music");
        self.publish(ExperimentEvent::AudioStop(AudioStopped {
            track_url: handle.track_url().to_string(),
        }));
    }
}
