mod common;

use common::TestApp;
use reqwest::StatusCode;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let (status, body) = app.get_json("/health/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Service is running");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn readiness_reports_store_health() {
    let app = TestApp::spawn().await;

    let (status, body) = app.get_json("/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health/"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn health_check_answers_without_trailing_slash() {
    let app = TestApp::spawn().await;

    let (status, body) = app.get_json("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Service is running");
}
