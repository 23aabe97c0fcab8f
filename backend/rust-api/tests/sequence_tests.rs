use axum::http::StatusCode;
use serde_json::json;

mod common;

#[tokio::test]
async fn test_sequences_alternate_between_music_orders() {
    let app = common::create_test_app();

    let (status, first) = common::get_json(&app, "/api/sequences/next").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["sequence"], "A");
    assert_eq!(first["experimentNumber"], 0);
    assert_eq!(first["startWithMusic"], true);

    let (_, second) = common::get_json(&app, "/api/sequences/next").await;
    assert_eq!(second["sequence"], "B_NO_MUSIC");
    assert_eq!(second["startWithMusic"], false);
    assert!(second["timestamp"].is_string());
}

#[tokio::test]
async fn test_tracking_endpoints_acknowledge() {
    let app = common::create_test_app();

    let (status, init) = common::post_json(
        &app,
        "/api/experiments/init",
        json!({ "experimentId": "participant_x-1718000000000" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(init["experimentId"], "participant_x-1718000000000");
    assert_eq!(init["message"], "Experiment initialized");

    let (status, complete) =
        common::post_json(&app, "/api/experiments/complete", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(complete["success"], true);

    let (status, task) = common::post_json(&app, "/api/tasks", json!({ "taskIndex": 0 })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["message"], "Task result received");
}
