use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::extractors::AppJson;
use crate::models::{
    CreateExperimentRequest, ExperimentSnapshot, SubmitResponseRequest, TrialResult,
};
use crate::services::experiment_service::ExperimentError;
use crate::services::export_service::{ExportService, XLSX_CONTENT_TYPE};
use crate::services::AppState;

/// POST /api/v1/experiments
pub async fn create_experiment(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateExperimentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        participant_id = ?req.participant_id,
        mode = ?req.mode,
        "Creating experiment"
    );

    let snapshot = state.experiments.create_experiment(req).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/v1/experiments/{id}
///
/// Falls back to the last saved snapshot when the experiment is no longer held by this process.
pub async fn get_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.experiments.snapshot(&experiment_id) {
        Ok(snapshot) => Ok(Json(serde_json::to_value(snapshot).map_err(anyhow::Error::from)?)),
        Err(ExperimentError::NotFound(_)) => state
            .experiments
            .saved_state(&experiment_id)
            .await?
            .map(Json)
            .ok_or_else(|| ApiError::not_found("Experiment not found")),
        Err(e) => Err(e.into()),
    }
}

/// DELETE /api/v1/experiments/{id}
pub async fn abandon_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.experiments.abandon(&experiment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/experiments/{id}/start
pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<Json<ExperimentSnapshot>, ApiError> {
    Ok(Json(state.experiments.start_task(&experiment_id).await?))
}

/// POST /api/v1/experiments/{id}/responses
pub async fn submit_response(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
    AppJson(req): AppJson<SubmitResponseRequest>,
) -> Result<Json<TrialResult>, ApiError> {
    let result = state
        .experiments
        .submit_response(&experiment_id, &req.response)
        .await?;

    tracing::debug!(
        experiment_id = %experiment_id,
        trial_id = %result.trial_id,
        correct = result.is_correct,
        "Response scored"
    );
    Ok(Json(result))
}

/// POST /api/v1/experiments/{id}/continue
pub async fn continue_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<Json<ExperimentSnapshot>, ApiError> {
    Ok(Json(
        state.experiments.continue_experiment(&experiment_id).await?,
    ))
}

/// GET /api/v1/experiments/{id}/export
pub async fn export_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.experiments.snapshot(&experiment_id)?;
    let bytes = ExportService::build_xlsx(&snapshot)?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        ExportService::file_name(&snapshot)
    );
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}
