// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification Pipeline (C6) — the single delivery path for proactive
//! messages from the webhook, the scheduler (C7), and polled integrations.
//! Ported from `notification_service.py`'s dedup/resolve/persist/deliver
//! sequence; suppression becomes an explicit [`Outcome::Suppressed`] instead
//! of the original's exception-for-control-flow.

use std::sync::Arc;

use indexmap::IndexSet;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RenfieldConfig;
use crate::devices::{Capabilities, Registry};
use crate::external::bridge::BridgeClient;
use crate::external::persistence::{
    Notification, NotificationFilter, NotificationSource, NotificationStatus, PersistenceStore,
    Privacy, Urgency,
};
use crate::external::tts::TtsClient;
use crate::external::tts_cache::TtsCache;
use crate::output_router::OutputRouter;
use crate::presence::PresenceTracker;
use crate::room::{normalize_room_name, OutputType};
use crate::transport::ws_msg::ServerFrame;

/// Inbound shape shared by all three ingress sources (spec §4.6, §6).
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub urgency: Urgency,
    pub room: Option<String>,
    pub tts: bool,
    pub data: Option<serde_json::Value>,
    pub privacy: Privacy,
    pub target_user_id: Option<String>,
    pub source: NotificationSource,
    /// Polled integrations must supply their own key; webhook/scheduler
    /// requests leave this `None` and get one computed.
    pub dedup_key: Option<String>,
}

impl NotificationRequest {
    pub fn webhook(event_type: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            title: title.into(),
            message: message.into(),
            urgency: Urgency::Info,
            room: None,
            tts: false,
            data: None,
            privacy: Privacy::Public,
            target_user_id: None,
            source: NotificationSource::Manual,
            dedup_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered { notification_id: String, delivered_to: Vec<String> },
    Suppressed,
}

/// Unknown privacy levels arrive as a raw string off the wire; parsing is
/// fail-safe (spec §4.6 "unknown privacy level -> deny").
pub fn parse_privacy(s: &str) -> Option<Privacy> {
    match s {
        "public" => Some(Privacy::Public),
        "personal" => Some(Privacy::Personal),
        "confidential" => Some(Privacy::Confidential),
        _ => None,
    }
}

pub struct NotificationPipeline {
    store: Arc<dyn PersistenceStore>,
    registry: Arc<Registry>,
    presence: Arc<PresenceTracker>,
    router: Arc<OutputRouter>,
    tts: Arc<dyn TtsClient>,
    bridge: Arc<dyn BridgeClient>,
    tts_cache: Arc<TtsCache>,
    public_base_url: String,
    seen_keys: Mutex<IndexSet<String>>,
    dedup_cache_cap: usize,
    suppression_window: chrono::Duration,
    default_ttl: chrono::Duration,
    presence_enabled: bool,
}

impl NotificationPipeline {
    pub fn new(
        config: &RenfieldConfig,
        store: Arc<dyn PersistenceStore>,
        registry: Arc<Registry>,
        presence: Arc<PresenceTracker>,
        router: Arc<OutputRouter>,
        tts: Arc<dyn TtsClient>,
        bridge: Arc<dyn BridgeClient>,
        tts_cache: Arc<TtsCache>,
    ) -> Self {
        Self {
            store,
            registry,
            presence,
            router,
            tts,
            bridge,
            tts_cache,
            public_base_url: config.public_base_url.clone(),
            seen_keys: Mutex::new(IndexSet::new()),
            dedup_cache_cap: config.notify_dedup_cache_cap,
            suppression_window: chrono::Duration::from_std(config.notify_suppression_window())
                .unwrap_or_default(),
            default_ttl: config.notify_default_ttl(),
            presence_enabled: config.presence_enabled,
        }
    }

    /// `process_webhook` / `process_scheduled` / `process_polled` (spec
    /// §4.6 Processing 1-6), unified since the three ingress sources only
    /// differ in how `dedup_key`/`source` get set before this is called.
    pub async fn process(&self, request: NotificationRequest) -> anyhow::Result<Outcome> {
        let dedup_key = match request.dedup_key {
            Some(key) => key,
            None => compute_dedup_key(&request.event_type, &request.title, &request.message, request.room.as_deref()),
        };

        if self.is_duplicate(&dedup_key).await? {
            debug!(dedup_key, "notification suppressed");
            return Ok(Outcome::Suppressed);
        }

        let (room_id, room_name) = self.resolve_room(request.room.as_deref()).await;

        let now = chrono::Utc::now();
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            event_type: request.event_type,
            title: request.title,
            message: request.message,
            urgency: request.urgency,
            room_id: room_id.clone(),
            room_name: room_name.clone(),
            source: request.source,
            source_data: request.data,
            status: NotificationStatus::Pending,
            tts_delivered: false,
            dedup_key,
            created_at: now,
            expires_at: now + self.default_ttl,
            privacy: request.privacy,
            target_user_id: request.target_user_id.clone(),
            delivered_at: None,
            delivered_to: Vec::new(),
        };
        self.store.insert_notification(notification.clone()).await?;

        let delivered_to = self.deliver(&notification, room_id.as_deref(), room_name.as_deref()).await;

        let tts_delivered = if request.tts {
            self.deliver_tts(&notification, room_id.as_deref(), room_name.as_deref()).await
        } else {
            false
        };

        let mut stored = notification;
        stored.status = NotificationStatus::Delivered;
        stored.delivered_at = Some(chrono::Utc::now());
        stored.delivered_to = delivered_to.clone();
        stored.tts_delivered = tts_delivered;
        let notification_id = stored.id.clone();
        self.store.update_notification(stored).await?;

        Ok(Outcome::Delivered { notification_id, delivered_to })
    }

    async fn is_duplicate(&self, dedup_key: &str) -> anyhow::Result<bool> {
        {
            let mut seen = self.seen_keys.lock().await;
            if seen.contains(dedup_key) {
                return Ok(true);
            }
            seen.insert(dedup_key.to_owned());
            while seen.len() > self.dedup_cache_cap {
                seen.shift_remove_index(0);
            }
        }
        let recent = self.store.find_recent_by_dedup_key(dedup_key, self.suppression_window).await?;
        Ok(recent.is_some())
    }

    /// Exact name match, then normalized-alias match (spec §4.6 step 3).
    async fn resolve_room(&self, room: Option<&str>) -> (Option<String>, Option<String>) {
        let Some(room) = room else { return (None, None) };
        if let Ok(Some(found)) = self.store.get_room(room).await {
            return (Some(found.id), Some(found.name));
        }
        let alias = normalize_room_name(room);
        if let Ok(Some(found)) = self.store.find_room_by_alias(&alias).await {
            return (Some(found.id), Some(found.name));
        }
        (None, Some(room.to_owned()))
    }

    /// Broadcast `{type:"notification", ...}` to display/notification
    /// capable devices in the room, or all such devices if room-less.
    async fn deliver(&self, notification: &Notification, room_id: Option<&str>, room_name: Option<&str>) -> Vec<String> {
        let frame = ServerFrame::Notification {
            notification_id: notification.id.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            urgency: urgency_str(notification.urgency).to_owned(),
            source: source_str(&notification.source),
            room: room_name.map(str::to_owned),
            tts_handled: false,
            created_at: notification.created_at,
        };

        let targets: Vec<String> = match room_name {
            Some(name) => {
                let devices = self.registry.list_devices().await;
                devices
                    .into_iter()
                    .filter(|d| d.room_name == name && d.capabilities.has_notification_display())
                    .map(|d| d.device_id)
                    .collect()
            }
            None => {
                let devices = self.registry.list_devices().await;
                devices.into_iter().filter(|d| d.capabilities.has_notification_display()).map(|d| d.device_id).collect()
            }
        };

        match room_name {
            Some(name) => {
                self.registry
                    .broadcast_to_room(name, frame, None, Some(requires_notification_display))
                    .await
            }
            None => self.registry.broadcast_all(frame, Some(requires_notification_display)).await,
        }
        let _ = room_id;
        targets
    }

    /// Step 5 of spec §4.6: privacy-gated TTS, routed via C5 when the room
    /// is known, otherwise broadcast to every speaker-equipped device.
    async fn deliver_tts(&self, notification: &Notification, room_id: Option<&str>, room_name: Option<&str>) -> bool {
        if !self
            .should_play_tts(notification.privacy, notification.target_user_id.as_deref(), room_id)
            .await
        {
            return false;
        }

        let spoken = format!("{}. {}", notification.title, notification.message);
        let audio = match self.tts.synthesize(&spoken, None).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(notification_id = %notification.id, err = %e, "tts synthesis failed");
                return false;
            }
        };

        if let Some(room_id) = room_id {
            let decision = self.router.route(room_id, OutputType::Audio, None).await;
            if let Some(device) = decision.device {
                match device.target {
                    crate::room::OutputTarget::Bridge { ref entity_id } => {
                        if let Ok(url) = self.publish_tts_audio(&audio).await {
                            self.router.play_on_bridge(entity_id, &url, device.tts_volume, audio.len()).await;
                            return true;
                        }
                    }
                    crate::room::OutputTarget::Local { ref device_id } => {
                        return self.send_tts_to_device(device_id, &notification.id, &audio).await;
                    }
                }
            }
        }

        self.broadcast_tts(room_name, &notification.id, &audio).await
    }

    /// The cached-TTS-server contract (spec §4.9): write synthesized audio
    /// into the cache under an opaque id and hand back the URL the bridge
    /// pulls it from (`GET /tts-cache/{id}`, served by `transport::http`).
    async fn publish_tts_audio(&self, audio: &[u8]) -> anyhow::Result<String> {
        let id = self.tts_cache.put(audio).await?;
        Ok(format!("{}/tts-cache/{id}", self.public_base_url.trim_end_matches('/')))
    }

    async fn send_tts_to_device(&self, device_id: &str, notification_id: &str, audio: &[u8]) -> bool {
        use base64::Engine;
        let Some(device) = self.registry.get_device(device_id).await else { return false };
        let _ = device;
        let frame = ServerFrame::TtsAudio {
            session_id: format!("notification-{notification_id}"),
            audio: base64::engine::general_purpose::STANDARD.encode(audio),
            is_final: true,
        };
        let devices = self.registry.list_devices().await;
        if !devices.iter().any(|d| d.device_id == device_id) {
            return false;
        }
        self.registry.broadcast_to_room(&devices_room(&devices, device_id), frame, None, None).await;
        true
    }

    async fn broadcast_tts(&self, room_name: Option<&str>, notification_id: &str, audio: &[u8]) -> bool {
        use base64::Engine;
        let frame = ServerFrame::TtsAudio {
            session_id: format!("notification-{notification_id}"),
            audio: base64::engine::general_purpose::STANDARD.encode(audio),
            is_final: true,
        };
        match room_name {
            Some(name) => self.registry.broadcast_to_room(name, frame, None, Some(requires_speaker)).await,
            None => self.registry.broadcast_all(frame, Some(requires_speaker)).await,
        }
        true
    }

    /// `should_play_tts(privacy, target_user_id, room_id)` (spec §4.6).
    pub async fn should_play_tts(&self, privacy: Privacy, target_user_id: Option<&str>, room_id: Option<&str>) -> bool {
        if privacy == Privacy::Public {
            return true;
        }
        if !self.presence_enabled {
            return false;
        }
        match privacy {
            Privacy::Public => true,
            Privacy::Confidential => {
                let Some(user_id) = target_user_id else { return false };
                matches!(self.presence.is_user_alone_in_room(user_id).await, Some(true))
            }
            Privacy::Personal => {
                let Some(room_id) = room_id else { return false };
                let occupants = self.presence.get_room_occupants(room_id).await;
                if occupants.is_empty() {
                    return false;
                }
                for occupant in &occupants {
                    match self.store.is_household_member(&occupant.user_id).await {
                        Ok(true) => {}
                        _ => return false,
                    }
                }
                true
            }
        }
    }

    pub async fn acknowledge(&self, id: &str, by: Option<&str>) -> anyhow::Result<Option<Notification>> {
        let Some(mut n) = self.store.get_notification(id).await? else { return Ok(None) };
        n.status = NotificationStatus::Acknowledged;
        let _ = by;
        self.store.update_notification(n.clone()).await?;
        Ok(Some(n))
    }

    pub async fn dismiss(&self, id: &str) -> anyhow::Result<Option<Notification>> {
        let Some(mut n) = self.store.get_notification(id).await? else { return Ok(None) };
        n.status = NotificationStatus::Dismissed;
        self.store.update_notification(n.clone()).await?;
        Ok(Some(n))
    }

    pub async fn list(&self, filter: &NotificationFilter) -> anyhow::Result<Vec<Notification>> {
        self.store.list_notifications(filter).await
    }

    pub async fn cleanup_expired(&self) -> anyhow::Result<u64> {
        self.store.delete_expired_notifications(chrono::Utc::now()).await
    }
}

fn requires_notification_display(caps: &Capabilities) -> bool {
    caps.has_notification_display()
}

fn requires_speaker(caps: &Capabilities) -> bool {
    caps.has_speaker()
}

fn devices_room(devices: &[crate::devices::Device], device_id: &str) -> String {
    devices.iter().find(|d| d.device_id == device_id).map(|d| d.room_name.clone()).unwrap_or_default()
}

fn urgency_str(u: Urgency) -> &'static str {
    match u {
        Urgency::Info => "info",
        Urgency::Warning => "warning",
        Urgency::Critical => "critical",
    }
}

fn source_str(s: &NotificationSource) -> String {
    match s {
        NotificationSource::Bridge => "bridge".to_owned(),
        NotificationSource::Poll(name) => format!("poll:{name}"),
        NotificationSource::Schedule => "schedule".to_owned(),
        NotificationSource::Reminder => "reminder".to_owned(),
        NotificationSource::Manual => "manual".to_owned(),
    }
}

/// `_compute_dedup_key`: sha256 of `event_type:title:message:room_name`,
/// truncated to 40 hex chars (spec §4.6 step 1; matches the original's
/// window exactly so dedup keys computed either side of a migration agree).
pub fn compute_dedup_key(event_type: &str, title: &str, message: &str, room_name: Option<&str>) -> String {
    let input = format!("{}:{}:{}:{}", event_type, title, message, room_name.unwrap_or(""));
    let digest = Sha256::digest(input.as_bytes());
    let hex = format!("{digest:x}");
    hex[..40].to_owned()
}

/// Spawn the periodic expiry sweep (spec §4.6 "Lifecycle").
pub fn spawn_expiry_sweeper(
    pipeline: Arc<NotificationPipeline>,
    interval: std::time::Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            match pipeline.cleanup_expired().await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "swept expired notifications"),
                Err(e) => warn!(err = %e, "notification expiry sweep failed"),
            }
        }
    });
}
