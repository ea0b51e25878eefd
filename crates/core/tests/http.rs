// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the coordination core's HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;

use renfield_core::transport::build_router;
use renfield_core::WEBHOOK_TOKEN_SETTING_KEY;

use common::{test_config, test_state_with_config};

async fn test_server() -> TestServer {
    let state = test_state_with_config(test_config()).await;
    TestServer::new(build_router(state)).expect("failed to create test server")
}

#[tokio::test]
async fn health_reports_zero_devices_with_no_auth_required() {
    let server = test_server().await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["device_count"], 0);
}

#[tokio::test]
async fn notify_webhook_without_token_set_is_delivered() {
    let server = test_server().await;
    let response = server
        .post("/notify")
        .json(&json!({
            "event_type": "test.event",
            "title": "hello",
            "message": "world",
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "delivered");
}

#[tokio::test]
async fn notify_webhook_rejects_bad_bearer_when_token_configured() {
    let mut cfg = test_config();
    cfg.webhook_token = Some("webhook-secret".to_owned());
    let state = test_state_with_config(cfg).await;
    state
        .store
        .put_setting(WEBHOOK_TOKEN_SETTING_KEY, serde_json::Value::String("webhook-secret".to_owned()))
        .await
        .expect("seed webhook token");
    let server = TestServer::new(build_router(state)).expect("server");

    let response = server
        .post("/notify")
        .add_header("authorization", "Bearer wrong")
        .json(&json!({"event_type": "e", "title": "t", "message": "m"}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn notify_webhook_accepts_correct_bearer_when_token_configured() {
    let mut cfg = test_config();
    cfg.webhook_token = Some("webhook-secret".to_owned());
    let state = test_state_with_config(cfg).await;
    state
        .store
        .put_setting(WEBHOOK_TOKEN_SETTING_KEY, serde_json::Value::String("webhook-secret".to_owned()))
        .await
        .expect("seed webhook token");
    let server = TestServer::new(build_router(state)).expect("server");

    let response = server
        .post("/notify")
        .add_header("authorization", "Bearer webhook-secret")
        .json(&json!({"event_type": "e", "title": "t", "message": "m"}))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn notify_webhook_rejects_unknown_urgency() {
    let server = test_server().await;
    let response = server
        .post("/notify")
        .json(&json!({"event_type": "e", "title": "t", "message": "m", "urgency": "apocalyptic"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_webhook_within_window_is_suppressed() {
    let server = test_server().await;
    let body = json!({"event_type": "door.opened", "title": "Door", "message": "Front door opened"});

    let first = server.post("/notify").json(&body).await;
    first.assert_status_ok();
    assert_eq!(first.json::<serde_json::Value>()["status"], "delivered");

    let second = server.post("/notify").json(&body).await;
    second.assert_status_ok();
    assert_eq!(second.json::<serde_json::Value>()["status"], "suppressed");
}

#[tokio::test]
async fn wakeword_config_roundtrip_get_and_patch() {
    let server = test_server().await;

    let got = server.get("/wakeword/config").await;
    got.assert_status_ok();
    let config: serde_json::Value = got.json();
    assert_eq!(config["keyword"], "hey_renfield");

    let patched = server.patch("/wakeword/config").json(&json!({"threshold": 0.8})).await;
    patched.assert_status_ok();
    let patched_body: serde_json::Value = patched.json();
    assert_eq!(patched_body["threshold"], 0.8);
    assert_eq!(patched_body["keyword"], "hey_renfield");
}

#[tokio::test]
async fn wakeword_config_patch_rejects_out_of_range_threshold() {
    let server = test_server().await;
    let response = server.patch("/wakeword/config").json(&json!({"threshold": 5.0})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wakeword_sync_status_reports_no_subscribers_initially() {
    let server = test_server().await;
    let response = server.get("/wakeword/sync").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn notification_list_ack_dismiss_lifecycle() {
    let server = test_server().await;
    let created = server
        .post("/notify")
        .json(&json!({"event_type": "reminder.due", "title": "Take a break", "message": "Stretch"}))
        .await;
    created.assert_status_ok();
    let created_body: serde_json::Value = created.json();
    let id = created_body["notification_id"].as_str().expect("notification_id").to_owned();

    let listed = server.get("/notifications").await;
    listed.assert_status_ok();
    let list: Vec<serde_json::Value> = listed.json();
    assert!(list.iter().any(|n| n["id"] == id));

    let acked = server.post(&format!("/notifications/{id}/ack")).json(&json!({"by": "alice"})).await;
    acked.assert_status_ok();
    assert_eq!(acked.json::<serde_json::Value>()["status"], "acknowledged");

    let dismissed = server.post(&format!("/notifications/{id}/dismiss")).await;
    dismissed.assert_status_ok();
    assert_eq!(dismissed.json::<serde_json::Value>()["status"], "dismissed");
}

#[tokio::test]
async fn dismiss_unknown_notification_is_not_found() {
    let server = test_server().await;
    let response = server.post("/notifications/does-not-exist/dismiss").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cached_tts_for_unknown_id_is_not_found() {
    let server = test_server().await;
    let response = server.get("/tts-cache/unknown-id").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auth_enabled_gates_non_health_non_device_routes() {
    let mut cfg = test_config();
    cfg.auth_enabled = true;
    cfg.secret_key = "a-real-secret".to_owned();
    let state = test_state_with_config(cfg).await;
    let server = TestServer::new(build_router(state)).expect("server");

    server.get("/health").await.assert_status_ok();

    let unauthorized = server.get("/notifications").await;
    unauthorized.assert_status(StatusCode::UNAUTHORIZED);

    let authorized = server.get("/notifications").add_header("authorization", "Bearer a-real-secret").await;
    authorized.assert_status_ok();
}
