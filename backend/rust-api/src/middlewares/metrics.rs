use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per normalized route.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Collapses experiment and participant identifiers so label cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    let mut normalized: Vec<&str> = Vec::new();
    let mut previous = "";

    for segment in path.split('/') {
        if is_identifier(previous, segment) {
            normalized.push("{id}");
        } else {
            normalized.push(segment);
        }
        previous = segment;
    }

    normalized.join("/")
}

fn is_identifier(previous: &str, segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    if is_uuid_like(segment) || is_numeric_id(segment) || is_experiment_id(segment) {
        return true;
    }
    // the collection routes only have fixed actions below `experiments`
    match previous {
        "results" => true,
        "experiments" => !matches!(segment, "init" | "complete"),
        _ => false,
    }
}

/// UUID format: 8-4-4-4-12 hex characters
fn is_uuid_like(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// `{participantId}-{epochMillis}`
fn is_experiment_id(s: &str) -> bool {
    s.rsplit_once('-')
        .is_some_and(|(participant, millis)| !participant.is_empty() && is_numeric_id(millis))
}
