// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers: health, the webhook notification ingress (spec §4.6), the
//! wake-word config fabric (spec §4.3), notification list/ack/dismiss, and
//! the cached-TTS pull endpoint (spec §4.9).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::RenfieldError;
use crate::external::persistence::{NotificationFilter, NotificationStatus, Privacy, Urgency};
use crate::notifications::{parse_privacy, NotificationRequest, Outcome};
use crate::state::AppState;
use crate::transport::auth::validate_bearer;
use crate::wakeword::WakeWordConfigPatch;
use crate::WEBHOOK_TOKEN_SETTING_KEY;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub device_count: usize,
}

/// `GET /health` — never auth-gated (`transport::auth::auth_layer` bypasses
/// this path unconditionally).
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let device_count = state.registry.list_devices().await.len();
    Json(HealthResponse { status: "running", device_count })
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub event_type: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub privacy: Option<String>,
    #[serde(default)]
    pub target_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyResponse {
    Delivered { notification_id: String, delivered_to: Vec<String> },
    Suppressed,
}

/// `POST /notify` — the webhook ingress (spec §4.6 "process_webhook"). Gated
/// a second time here by the rotatable webhook token (distinct from the
/// admin `secret_key` the rest of the API uses), since external integrations
/// posting events are not expected to hold an admin credential.
pub async fn notify_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NotifyRequest>,
) -> impl IntoResponse {
    let webhook_token = match state.store.get_setting(WEBHOOK_TOKEN_SETTING_KEY).await {
        Ok(Some(setting)) => setting.value.as_str().map(str::to_owned),
        Ok(None) => None,
        Err(_) => return RenfieldError::Internal.to_http_response("failed to load webhook token").into_response(),
    };
    if let Err(e) = validate_bearer(&headers, webhook_token.as_deref()) {
        return e.to_http_response("unauthorized").into_response();
    }

    let urgency = match req.urgency.as_deref() {
        None => Urgency::Info,
        Some("info") => Urgency::Info,
        Some("warning") => Urgency::Warning,
        Some("critical") => Urgency::Critical,
        Some(_) => return RenfieldError::Validation.to_http_response("unknown urgency").into_response(),
    };
    let privacy = match req.privacy.as_deref() {
        None => Privacy::Public,
        Some(raw) => match parse_privacy(raw) {
            Some(privacy) => privacy,
            None => return RenfieldError::Validation.to_http_response("unknown privacy level").into_response(),
        },
    };

    let request = NotificationRequest {
        event_type: req.event_type,
        title: req.title,
        message: req.message,
        urgency,
        room: req.room,
        tts: req.tts,
        data: req.data,
        privacy,
        target_user_id: req.target_user_id,
        source: crate::external::persistence::NotificationSource::Manual,
        dedup_key: None,
    };

    match state.notifications.process(request).await {
        Ok(Outcome::Delivered { notification_id, delivered_to }) => {
            Json(NotifyResponse::Delivered { notification_id, delivered_to }).into_response()
        }
        Ok(Outcome::Suppressed) => Json(NotifyResponse::Suppressed).into_response(),
        Err(e) => RenfieldError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /wakeword/config` (spec §4.3).
pub async fn get_wakeword_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.wakeword.get_config().await)
}

/// `PATCH /wakeword/config` (spec §4.3).
pub async fn update_wakeword_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<WakeWordConfigPatch>,
) -> impl IntoResponse {
    match state.wakeword.update_config(patch).await {
        Ok(config) => Json(config).into_response(),
        Err(e) => e.to_http_response("invalid wake word config").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncStatusQuery {
    #[serde(default)]
    pub device_id: Option<String>,
}

/// `GET /wakeword/sync` (spec §4.3).
pub async fn wakeword_sync_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SyncStatusQuery>,
) -> impl IntoResponse {
    Json(state.wakeword.get_device_sync_status(query.device_id.as_deref()).await)
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
}

/// `GET /notifications` (spec §4.6 reads).
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationListQuery>,
) -> impl IntoResponse {
    let urgency = match query.urgency.as_deref() {
        None => None,
        Some("info") => Some(Urgency::Info),
        Some("warning") => Some(Urgency::Warning),
        Some("critical") => Some(Urgency::Critical),
        Some(_) => return RenfieldError::Validation.to_http_response("unknown urgency").into_response(),
    };
    let status = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(NotificationStatus::Pending),
        Some("delivered") => Some(NotificationStatus::Delivered),
        Some("acknowledged") => Some(NotificationStatus::Acknowledged),
        Some("dismissed") => Some(NotificationStatus::Dismissed),
        Some(_) => return RenfieldError::Validation.to_http_response("unknown status").into_response(),
    };

    let filter = NotificationFilter { room_id: query.room_id, urgency, status, since: query.since };
    match state.notifications.list(&filter).await {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => RenfieldError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AcknowledgeRequest {
    #[serde(default)]
    pub by: Option<String>,
}

/// `POST /notifications/{id}/ack`.
pub async fn acknowledge_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AcknowledgeRequest>>,
) -> impl IntoResponse {
    let by = body.and_then(|Json(b)| b.by);
    match state.notifications.acknowledge(&id, by.as_deref()).await {
        Ok(Some(notification)) => Json(notification).into_response(),
        Ok(None) => RenfieldError::NotFound.to_http_response("notification not found").into_response(),
        Err(e) => RenfieldError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `POST /notifications/{id}/dismiss`.
pub async fn dismiss_notification(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.notifications.dismiss(&id).await {
        Ok(Some(notification)) => Json(notification).into_response(),
        Ok(None) => RenfieldError::NotFound.to_http_response("notification not found").into_response(),
        Err(e) => RenfieldError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /tts-cache/{id}` — pull endpoint the home bridge uses to fetch
/// synthesized audio by opaque id (spec §4.9).
pub async fn get_cached_tts(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.tts_cache.get(&id).await {
        Ok(Some(bytes)) => (StatusCode::OK, [(header::CONTENT_TYPE, "audio/wav")], bytes).into_response(),
        Ok(None) => RenfieldError::NotFound.to_http_response("tts audio not found").into_response(),
        Err(e) => RenfieldError::Internal.to_http_response(e.to_string()).into_response(),
    }
}
