mod common;

use common::{submit_contract, TestApp};
use reqwest::StatusCode;

#[tokio::test]
async fn query_without_matches_is_empty() {
    let app = TestApp::spawn().await;
    submit_contract(&app, "renewal", "acme").await;

    let (status, body) = app
        .get_json("/interpretation/status/?task_name=nothing-like-this&company=acme")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total"], 0);
    assert_eq!(body["data"]["total_pages"], 0);
    assert_eq!(body["data"]["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn query_matches_task_name_substring_and_company() {
    let app = TestApp::spawn().await;
    let wanted = submit_contract(&app, "2025 group medical plan", "acme").await;
    submit_contract(&app, "2025 group medical plan", "globex").await;
    submit_contract(&app, "accident cover", "acme").await;

    let (status, body) = app
        .get_json("/interpretation/status/?task_name=medical&company=acme")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["page"], 1);
    assert_eq!(body["data"]["page_size"], 10);
    let rows = body["data"]["data"].as_array().unwrap();
    assert_eq!(rows[0]["task_id"], wanted.as_str());
}

#[tokio::test]
async fn query_filters_by_status() {
    let app = TestApp::spawn().await;
    let id = submit_contract(&app, "renewal", "acme").await;
    app.wait_for_terminal(&id).await;

    let (_, done) = app
        .get_json("/interpretation/status/?task_name=renewal&company=acme&status=succeeded")
        .await;
    let (_, failed) = app
        .get_json("/interpretation/status/?task_name=renewal&company=acme&status=failed")
        .await;

    assert_eq!(done["data"]["total"], 1);
    assert_eq!(done["data"]["data"][0]["progress"], "100%");
    assert_eq!(failed["data"]["total"], 0);
}

#[tokio::test]
async fn page_size_is_clamped() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .get_json("/interpretation/status/?task_name=x&company=acme&page=0&page_size=1000")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["page"], 1);
    assert_eq!(body["data"]["page_size"], 100);
}

#[tokio::test]
async fn invalid_filters_are_bad_requests() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .get_json("/interpretation/status/?task_name=x&company=acme&status=unknown")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .get_json("/interpretation/status/?task_name=x&company=acme&created_before=01/02/2025")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn name_and_company_are_required() {
    let app = TestApp::spawn().await;
    submit_contract(&app, "renewal", "acme").await;

    for query in [
        "/interpretation/status/",
        "/interpretation/status/?task_name=renewal",
        "/interpretation/status/?task_name=renewal&company=",
    ] {
        let (status, body) = app.get_json(query).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", query);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Required query parameters: task_name, company");
    }
}
