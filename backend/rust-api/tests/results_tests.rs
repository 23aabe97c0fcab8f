use axum::http::StatusCode;
use serde_json::json;

mod common;

fn submission() -> serde_json::Value {
    json!({
        "totalTrials": 8,
        "correctTrials": 5,
        "passFailMap": { "3": [true, true], "4": [true, false] },
        "direction": "backward",
        "experimentMode": "full",
        "completed": true,
        "sequence": "A",
        "trialDetails": []
    })
}

#[tokio::test]
async fn test_save_result_returns_created_record() {
    let app = common::create_test_app();

    let (status, body) = common::post_json(&app, "/api/digit-span/results", submission()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let participant_id = body["participantId"].as_str().unwrap();
    assert!(participant_id.starts_with("participant_"));
    assert!(!body["resultId"].as_str().unwrap().is_empty());
    assert_eq!(body["data"]["accuracy"], 62.5);
    assert_eq!(body["data"]["sequence"], "A");
    assert_eq!(body["data"]["passFailMap"]["4"], json!([true, false]));
}

#[tokio::test]
async fn test_missing_required_fields_are_rejected() {
    let app = common::create_test_app();
    let mut incomplete = submission();
    incomplete.as_object_mut().unwrap().remove("passFailMap");

    let (status, body) = common::post_json(&app, "/api/digit-span/results", incomplete).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing required fields");
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_malformed_direction_is_a_json_400() {
    let app = common::create_test_app();
    let mut invalid = submission();
    invalid["direction"] = json!("sideways");

    let (status, body) = common::post_json(&app, "/api/digit-span/results", invalid).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_results_are_listed_recent_and_by_participant() {
    let app = common::create_test_app();

    let mut mine = submission();
    mine["participantId"] = json!("participant_lab01");
    common::post_json(&app, "/api/digit-span/results", mine.clone()).await;
    common::post_json(&app, "/api/digit-span/results", mine).await;
    common::post_json(&app, "/api/digit-span/results", submission()).await;

    let (status, recent) = common::get_json(&app, "/api/digit-span/results").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recent["success"], true);
    assert_eq!(recent["count"], 3);

    let (status, by_participant) =
        common::get_json(&app, "/api/digit-span/results/participant_lab01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_participant["count"], 2);
    assert_eq!(by_participant["participantId"], "participant_lab01");
    assert!(by_participant["data"]
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["participantId"] == "participant_lab01"));
}
