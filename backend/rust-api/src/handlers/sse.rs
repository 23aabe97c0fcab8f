use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use super::ApiError;
use crate::metrics::SSE_CONNECTIONS_ACTIVE;
use crate::models::{ExperimentEvent, ExperimentSnapshot};
use crate::services::AppState;

/// GET /api/v1/experiments/{id}/stream
///
/// Starts with a `snapshot` event, then relays experiment events until `experiment-complete`.
pub async fn experiment_stream(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let receiver = state.experiments.subscribe(&experiment_id)?;
    let snapshot = state.experiments.snapshot(&experiment_id)?;

    tracing::info!("Client connected to SSE stream: experiment={}", experiment_id);

    let stream = create_event_stream(experiment_id, snapshot, receiver);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Keeps the active-connection gauge accurate however the stream ends.
struct ConnectionGuard {
    experiment_id: String,
}

impl ConnectionGuard {
    fn new(experiment_id: String) -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        Self { experiment_id }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
        tracing::info!("SSE stream closed: experiment={}", self.experiment_id);
    }
}

enum StreamState {
    Snapshot(ExperimentSnapshot),
    Relaying,
    Done,
}

fn create_event_stream(
    experiment_id: String,
    snapshot: ExperimentSnapshot,
    receiver: broadcast::Receiver<ExperimentEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = ConnectionGuard::new(experiment_id);

    stream::unfold(
        (StreamState::Snapshot(snapshot), receiver, guard),
        |(state, mut receiver, guard)| async move {
            match state {
                StreamState::Done => None,
                StreamState::Snapshot(snapshot) => {
                    let data = serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".into());
                    let event = Event::default().event("snapshot").data(data);
                    Some((Ok(event), (StreamState::Relaying, receiver, guard)))
                }
                StreamState::Relaying => loop {
                    match receiver.recv().await {
                        Ok(experiment_event) => {
                            let next = if matches!(
                                experiment_event,
                                ExperimentEvent::ExperimentComplete(_)
                            ) {
                                StreamState::Done
                            } else {
                                StreamState::Relaying
                            };
                            let event = Event::default()
                                .event(experiment_event.event_name())
                                .data(experiment_event.to_sse_data());
                            return Some((Ok(event), (next, receiver, guard)));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                "SSE client lagging: experiment={}, skipped={}",
                                guard.experiment_id,
                                skipped
                            );
                        }
                        Err(RecvError::Closed) => return None,
                    }
                },
            }
        },
    )
}
