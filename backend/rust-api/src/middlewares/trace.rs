use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
const MAX_TRACE_ID_LEN: usize = 128;

#[derive(Clone, Debug)]
pub struct RequestTraceContext {
    pub trace_id: String,
}

/// Reuses the caller's `x-trace-id` when it is usable, otherwise mints one, and echoes it on
/// the response so browser logs and server logs can be joined per experiment request.
pub async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(usable_trace_id);
    let trace_id = incoming
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestTraceContext {
        trace_id: trace_id.clone(),
    });

    if incoming.is_none() {
        if let Ok(header_value) = HeaderValue::from_str(&trace_id) {
            request
                .headers_mut()
                .insert(HeaderName::from_static(TRACE_ID_HEADER), header_value);
        }
    }

    tracing::debug!(
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
        "Request received"
    );

    let mut response = next.run(request).await;

    if response.headers().get(TRACE_ID_HEADER).is_none() {
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
        }
    }

    response
}

fn usable_trace_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_TRACE_ID_LEN {
        return None;
    }
    Some(trimmed.to_string())
}
