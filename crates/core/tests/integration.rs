// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-component integration tests: HTTP surface driving real registry,
//! wake-word fabric, and notification pipeline wiring together, the way a
//! deployed instance actually exercises them.

mod common;

use axum_test::TestServer;
use serde_json::json;
use tokio::sync::mpsc;

use renfield_core::devices::{Capabilities, DeviceMetadata, DeviceType};
use renfield_core::transport::build_router;
use renfield_core::transport::ws_msg::ServerFrame;

use common::{test_config, test_state_with_config};

#[tokio::test]
async fn notification_delivered_to_registered_device_in_matching_room() {
    let state = test_state_with_config(test_config()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    state
        .registry
        .register(
            "kitchen-display".into(),
            DeviceType::WebPanel,
            "Kitchen".into(),
            Capabilities { notification_display: true, ..DeviceType::WebPanel.default_capabilities() },
            DeviceMetadata::default(),
            true,
            tx,
        )
        .await;

    let server = TestServer::new(build_router(state)).expect("server");
    let response = server
        .post("/notify")
        .json(&json!({
            "event_type": "package.delivered",
            "title": "Package arrived",
            "message": "A package was delivered to the front door",
            "room": "Kitchen",
        }))
        .await;
    response.assert_status_ok();

    let frame = rx.try_recv().expect("kitchen device should have received the notification frame");
    match frame {
        ServerFrame::Notification { title, room, .. } => {
            assert_eq!(title, "Package arrived");
            assert_eq!(room.as_deref(), Some("Kitchen"));
        }
        other => panic!("expected a Notification frame, got {other:?}"),
    }
}

#[tokio::test]
async fn notification_skips_device_in_different_room() {
    let state = test_state_with_config(test_config()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    state
        .registry
        .register(
            "bedroom-display".into(),
            DeviceType::WebPanel,
            "Bedroom".into(),
            Capabilities { notification_display: true, ..DeviceType::WebPanel.default_capabilities() },
            DeviceMetadata::default(),
            true,
            tx,
        )
        .await;

    let server = TestServer::new(build_router(state)).expect("server");
    server
        .post("/notify")
        .json(&json!({
            "event_type": "package.delivered",
            "title": "Package arrived",
            "message": "at the door",
            "room": "Kitchen",
        }))
        .await
        .assert_status_ok();

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn wakeword_patch_over_http_reaches_subscribed_device() {
    let state = test_state_with_config(test_config()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.wakeword.subscribe("sub-1".into(), Some("sat-1".into()), Some("satellite".into()), tx).await;

    let server = TestServer::new(build_router(state.clone())).expect("server");
    let response = server.patch("/wakeword/config").json(&json!({"keyword": "hey_computer"})).await;
    response.assert_status_ok();

    let frame = rx.try_recv().expect("subscriber should have received a config update frame");
    match frame {
        ServerFrame::ConfigUpdate { config, config_version } => {
            assert_eq!(config["keyword"], "hey_computer");
            assert_eq!(config_version, 1);
        }
        other => panic!("expected a ConfigUpdate frame, got {other:?}"),
    }

    let status = state.wakeword.get_device_sync_status(Some("sat-1")).await;
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.synced_count, 0);
}

#[tokio::test]
async fn wakeword_ack_after_patch_moves_device_to_synced() {
    let state = test_state_with_config(test_config()).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    state.wakeword.subscribe("sub-1".into(), Some("sat-1".into()), Some("satellite".into()), tx).await;
    state
        .wakeword
        .update_config(renfield_core::wakeword::WakeWordConfigPatch {
            keyword: Some("hey_computer".into()),
            ..Default::default()
        })
        .await
        .expect("valid patch");

    state.wakeword.handle_config_ack("sub-1", true, vec!["hey_computer".into()], vec![], None).await;

    let status = state.wakeword.get_device_sync_status(Some("sat-1")).await;
    assert_eq!(status.synced_count, 1);
    assert_eq!(status.pending_count, 0);
}

#[tokio::test]
async fn notification_ack_then_dismiss_over_http_updates_persisted_status() {
    let state = test_state_with_config(test_config()).await;
    let server = TestServer::new(build_router(state.clone())).expect("server");

    let created = server
        .post("/notify")
        .json(&json!({"event_type": "battery.low", "title": "Low battery", "message": "Satellite battery low"}))
        .await;
    created.assert_status_ok();
    let id = created.json::<serde_json::Value>()["notification_id"].as_str().unwrap().to_owned();

    server.post(&format!("/notifications/{id}/ack")).json(&json!({})).await.assert_status_ok();

    let filter = renfield_core::external::persistence::NotificationFilter::default();
    let stored = state.notifications.list(&filter).await.expect("list");
    let found = stored.iter().find(|n| n.id == id).expect("notification persisted");
    assert_eq!(found.status, renfield_core::external::persistence::NotificationStatus::Acknowledged);
}
