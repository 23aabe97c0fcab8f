use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use serial_test::serial;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn test_health_reports_in_memory_backends() {
    let app = common::create_test_app();

    for uri in ["/health", "/api/health"] {
        let (status, body) = common::get_json(&app, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "digitspan-api");
        assert_eq!(body["dependencies"]["mongodb"]["status"], "healthy");
        assert_eq!(body["dependencies"]["redis"]["status"], "healthy");
    }
}

#[tokio::test]
async fn test_responses_carry_trace_id() {
    let app = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "lab-session-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-trace-id"], "lab-session-7");
}

#[tokio::test]
#[serial]
async fn test_metrics_require_basic_auth() {
    std::env::remove_var("METRICS_AUTH");
    let app = common::create_test_app();

    let unauthorized = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let credentials = general_purpose::STANDARD.encode("admin:changeme");
    let authorized = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header("authorization", format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(authorized.status(), StatusCode::OK);

    let body = to_bytes(authorized.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"));
}
