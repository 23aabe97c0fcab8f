use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use super::ApiError;
use crate::extractors::AppJson;
use crate::models::{ResultListResponse, ResultSubmission, SaveResultResponse};
use crate::services::AppState;

/// POST /api/digit-span/results
pub async fn save_result(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<ResultSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    if let Err(errors) = req.validate() {
        tracing::warn!("Rejected result submission: {}", errors);
        return Err(ApiError::bad_request("Missing required fields"));
    }

    let record = state.results.save(req).await.map_err(|e| {
        tracing::error!("Error saving digit span results: {}", e);
        ApiError::Internal("Failed to save results".to_string())
    })?;

    let response = SaveResultResponse {
        success: true,
        message: "Results saved successfully".to_string(),
        participant_id: record.participant_id.clone(),
        result_id: record.id.clone(),
        data: record.into(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/digit-span/results
pub async fn list_recent(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResultListResponse>, ApiError> {
    let records = state.results.list_recent().await.map_err(|e| {
        tracing::error!("Error fetching results: {}", e);
        ApiError::Internal("Failed to fetch results".to_string())
    })?;

    Ok(Json(ResultListResponse::new(records, None)))
}

/// GET /api/digit-span/results/{participantId}
pub async fn list_by_participant(
    State(state): State<Arc<AppState>>,
    Path(participant_id): Path<String>,
) -> Result<Json<ResultListResponse>, ApiError> {
    let records = state
        .results
        .list_by_participant(&participant_id)
        .await
        .map_err(|e| {
            tracing::error!("Error fetching participant results: {}", e);
            ApiError::Internal("Failed to fetch participant results".to_string())
        })?;

    Ok(Json(ResultListResponse::new(records, Some(participant_id))))
}
