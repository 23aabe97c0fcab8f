//! Acknowledgement endpoints the browser calls around an experiment. Payloads are logged only;
//! results are persisted once through the results endpoint.

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::extractors::AppJson;

/// POST /api/experiments/init
pub async fn init_experiment(AppJson(body): AppJson<Value>) -> impl IntoResponse {
    tracing::info!(payload = %body, "Initializing experiment");

    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Experiment initialized",
            "experimentId": body.get("experimentId").cloned().unwrap_or(Value::Null),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

/// POST /api/experiments/complete
pub async fn complete_experiment(AppJson(body): AppJson<Value>) -> impl IntoResponse {
    tracing::info!(payload = %body, "Completing experiment");

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Experiment completed",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

/// POST /api/tasks
pub async fn record_task(AppJson(body): AppJson<Value>) -> impl IntoResponse {
    tracing::info!(payload = %body, "Received task result");

    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Task result received",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
