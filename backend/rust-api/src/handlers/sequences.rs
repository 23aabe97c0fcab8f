use axum::{extract::State, Json};
use std::sync::Arc;

use super::ApiError;
use crate::models::SequenceAssignment;
use crate::services::AppState;

/// GET /api/sequences/next
pub async fn next_sequence(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SequenceAssignment>, ApiError> {
    let assignment = state.sequences.next_assignment().await.map_err(|e| {
        tracing::error!("Error getting next sequence: {}", e);
        ApiError::Internal("Failed to get next sequence".to_string())
    })?;

    Ok(Json(assignment))
}
