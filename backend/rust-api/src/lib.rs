#![allow(dead_code)]

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config.cors_origins);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .merge(legacy_routes())
        .nest("/api/v1/experiments", experiment_routes())
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Endpoints the browser-driven client already talks to.
fn legacy_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sequences/next", get(handlers::sequences::next_sequence))
        .route(
            "/api/experiments/init",
            post(handlers::tracking::init_experiment),
        )
        .route(
            "/api/experiments/complete",
            post(handlers::tracking::complete_experiment),
        )
        .route("/api/tasks", post(handlers::tracking::record_task))
        .route(
            "/api/digit-span/results",
            get(handlers::results::list_recent).post(handlers::results::save_result),
        )
        .route(
            "/api/digit-span/results/{participant_id}",
            get(handlers::results::list_by_participant),
        )
}

fn experiment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::experiments::create_experiment))
        .route(
            "/{id}",
            get(handlers::experiments::get_experiment)
                .delete(handlers::experiments::abandon_experiment),
        )
        .route("/{id}/start", post(handlers::experiments::start_task))
        .route(
            "/{id}/responses",
            post(handlers::experiments::submit_response),
        )
        .route(
            "/{id}/continue",
            post(handlers::experiments::continue_experiment),
        )
        .route("/{id}/stream", get(handlers::sse::experiment_stream))
        .route("/{id}/export", get(handlers::experiments::export_experiment))
}
