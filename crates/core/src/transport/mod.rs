// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport surface: the device protocol endpoint (spec
//! §6), the webhook/wake-word/notification HTTP API (spec §4), and the
//! shared Bearer-auth middleware.

pub mod auth;
pub mod http;
pub mod ws;
pub mod ws_msg;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` for the coordination core.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/devices/ws", get(ws::device_ws_handler))
        .route("/notify", post(http::notify_webhook))
        .route("/wakeword/config", get(http::get_wakeword_config).patch(http::update_wakeword_config))
        .route("/wakeword/sync", get(http::wakeword_sync_status))
        .route("/notifications", get(http::list_notifications))
        .route("/notifications/{id}/ack", post(http::acknowledge_notification))
        .route("/notifications/{id}/dismiss", post(http::dismiss_notification))
        .route("/tts-cache/{id}", get(http::get_cached_tts))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
