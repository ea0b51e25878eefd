// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device Registry (C1) — tracks connected endpoints, their capabilities,
//! heartbeats, and lifecycle. Co-located with the Session Manager (C2) in
//! [`crate::session`]; both share the single [`Registry`] lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::config::RenfieldConfig;
use crate::session::Session;
use crate::transport::ws_msg::{ServerFrame, SessionEndReason};

/// The kind of endpoint that registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Satellite,
    WebPanel,
    WebTablet,
    WebBrowser,
    WebKiosk,
}

impl DeviceType {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "satellite" => Self::Satellite,
            "web_panel" => Self::WebPanel,
            "web_tablet" => Self::WebTablet,
            "web_kiosk" => Self::WebKiosk,
            _ => Self::WebBrowser,
        }
    }

    /// Static default capability matrix per device type (design note: "dynamic
    /// capability dicts become typed capability records" with default tables
    /// keyed on the enum).
    pub fn default_capabilities(self) -> Capabilities {
        match self {
            Self::Satellite => Capabilities {
                microphone: true,
                speaker: true,
                wake_word: Some(WakeWordCapability { method: "onnx".to_owned() }),
                display: None,
                led_ring: Some(LedRingCapability { count: 12 }),
                physical_button: true,
                notification_display: false,
            },
            Self::WebPanel => Capabilities {
                microphone: true,
                speaker: true,
                wake_word: None,
                display: Some(DisplayCapability { size: "large".to_owned() }),
                led_ring: None,
                physical_button: false,
                notification_display: true,
            },
            Self::WebTablet | Self::WebKiosk => Capabilities {
                microphone: true,
                speaker: true,
                wake_word: None,
                display: Some(DisplayCapability { size: "medium".to_owned() }),
                led_ring: None,
                physical_button: false,
                notification_display: true,
            },
            Self::WebBrowser => Capabilities {
                microphone: true,
                speaker: true,
                wake_word: None,
                display: Some(DisplayCapability { size: "small".to_owned() }),
                led_ring: None,
                physical_button: false,
                notification_display: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeWordCapability {
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayCapability {
    pub size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedRingCapability {
    pub count: u32,
}

/// Immutable-for-the-connection capability record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub microphone: bool,
    pub speaker: bool,
    pub wake_word: Option<WakeWordCapability>,
    pub display: Option<DisplayCapability>,
    pub led_ring: Option<LedRingCapability>,
    pub physical_button: bool,
    pub notification_display: bool,
}

impl Capabilities {
    pub fn has_microphone(&self) -> bool {
        self.microphone
    }

    pub fn has_speaker(&self) -> bool {
        self.speaker
    }

    pub fn has_wakeword(&self) -> bool {
        self.wake_word.is_some()
    }

    pub fn has_display(&self) -> bool {
        self.display.is_some()
    }

    pub fn has_notification_display(&self) -> bool {
        self.notification_display || self.has_display()
    }

    /// Parse the `has_X` booleans named in a `capabilities` JSON blob,
    /// falling back to the device type's static default for anything absent.
    pub fn from_json(value: &serde_json::Value, device_type: DeviceType) -> Self {
        let defaults = device_type.default_capabilities();
        Capabilities {
            microphone: value.get("microphone").and_then(|v| v.as_bool()).unwrap_or(defaults.microphone),
            speaker: value.get("speaker").and_then(|v| v.as_bool()).unwrap_or(defaults.speaker),
            wake_word: value
                .get("wake_word")
                .and_then(|v| v.get("method"))
                .and_then(|v| v.as_str())
                .map(|m| WakeWordCapability { method: m.to_owned() })
                .or(defaults.wake_word),
            display: value
                .get("display")
                .and_then(|v| v.get("size"))
                .and_then(|v| v.as_str())
                .map(|s| DisplayCapability { size: s.to_owned() })
                .or(defaults.display),
            led_ring: value
                .get("led_ring")
                .and_then(|v| v.get("count"))
                .and_then(|v| v.as_u64())
                .map(|c| LedRingCapability { count: c as u32 })
                .or(defaults.led_ring),
            physical_button: value
                .get("physical_button")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.physical_button),
            notification_display: value
                .get("notification_display")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.notification_display),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Live satellite metrics merged in on heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub rms: Option<f32>,
    pub cpu_percent: Option<f32>,
    pub temperature_c: Option<f32>,
    pub error_count: Option<u32>,
}

impl DeviceMetrics {
    fn merge(&mut self, other: &serde_json::Value) {
        if let Some(v) = other.get("rms").and_then(|v| v.as_f64()) {
            self.rms = Some(v as f32);
        }
        if let Some(v) = other.get("cpu_percent").and_then(|v| v.as_f64()) {
            self.cpu_percent = Some(v as f32);
        }
        if let Some(v) = other.get("temperature_c").and_then(|v| v.as_f64()) {
            self.temperature_c = Some(v as f32);
        }
        if let Some(v) = other.get("error_count").and_then(|v| v.as_u64()) {
            self.error_count = Some(v as u32);
        }
    }
}

/// A connected endpoint. Exclusively owned by the registry while connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub device_type: DeviceType,
    pub room_name: String,
    pub room_id: Option<String>,
    pub capabilities: Capabilities,
    pub state: DeviceState,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub current_session_id: Option<String>,
    pub is_stationary: bool,
    pub metadata: DeviceMetadata,
    pub metrics: DeviceMetrics,
}

/// A device record plus its companion outbound channel. The channel is the
/// only I/O surface the registry lock's critical sections ever touch.
pub struct DeviceRecord {
    pub device: Device,
    pub channel: mpsc::UnboundedSender<ServerFrame>,
}

/// Shared state for C1 (devices) + C2 (sessions): one exclusive lock guards
/// both maps, per spec §5.
#[derive(Default)]
pub struct RegistryInner {
    pub devices: HashMap<String, DeviceRecord>,
    pub sessions: HashMap<String, Session>,
}

pub struct Registry {
    pub inner: RwLock<RegistryInner>,
    pub config: Arc<RenfieldConfig>,
}

impl Registry {
    pub fn new(config: Arc<RenfieldConfig>) -> Self {
        Self { inner: RwLock::new(RegistryInner::default()), config }
    }

    /// `register(device_id, type, room, capabilities, metadata)` (spec §4.1).
    ///
    /// Reconnection is the steady-state expectation: if a record already
    /// exists for this `device_id`, its prior channel is force-closed (by
    /// dropping the sender), its session (if any) ended with
    /// `reason=disconnect`, and the new record replaces it in place.
    pub async fn register(
        &self,
        device_id: String,
        device_type: DeviceType,
        room_name: String,
        capabilities: Capabilities,
        metadata: DeviceMetadata,
        is_stationary: bool,
        channel: mpsc::UnboundedSender<ServerFrame>,
    ) {
        let mut inner = self.inner.write().await;

        if let Some(prior) = inner.devices.remove(&device_id) {
            if let Some(session_id) = prior.device.current_session_id.clone() {
                Self::end_session_locked(&mut inner, &session_id, SessionEndReason::Disconnect);
            }
            // Dropping `prior.channel` here force-closes the old connection.
            drop(prior);
        }

        let now = Utc::now();
        let device = Device {
            device_id: device_id.clone(),
            device_type,
            room_name,
            room_id: None,
            capabilities,
            state: DeviceState::Idle,
            connected_at: now,
            last_heartbeat: now,
            current_session_id: None,
            is_stationary,
            metadata,
            metrics: DeviceMetrics::default(),
        };

        inner.devices.insert(device_id.clone(), DeviceRecord { device, channel });
        info!(device_id = %device_id, "device registered");
    }

    /// `unregister(device_id)` (spec §4.1): ends any session, removes record.
    pub async fn unregister(&self, device_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.devices.get(device_id) {
            if let Some(session_id) = record.device.current_session_id.clone() {
                Self::end_session_locked(&mut inner, &session_id, SessionEndReason::Disconnect);
            }
        }
        inner.devices.remove(device_id);
    }

    /// `update_heartbeat(device_id, metrics?)` (spec §4.1).
    pub async fn update_heartbeat(&self, device_id: &str, metrics: Option<&serde_json::Value>) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.devices.get_mut(device_id) {
            record.device.last_heartbeat = Utc::now();
            if record.device.device_type == DeviceType::Satellite {
                if let Some(m) = metrics {
                    record.device.metrics.merge(m);
                }
            }
        }
    }

    /// `set_room_id(device_id, room_id)` (spec §4.1).
    pub async fn set_room_id(&self, device_id: &str, room_id: String) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.devices.get_mut(device_id) {
            record.device.room_id = Some(room_id);
        }
    }

    pub async fn get_device(&self, device_id: &str) -> Option<Device> {
        let inner = self.inner.read().await;
        inner.devices.get(device_id).map(|r| r.device.clone())
    }

    pub async fn list_devices(&self) -> Vec<Device> {
        let inner = self.inner.read().await;
        inner.devices.values().map(|r| r.device.clone()).collect()
    }

    /// `broadcast_to_room(room, message, exclude?, require_capability?)`
    /// (spec §4.1). Iterates room members, skipping those lacking the
    /// required capability. Failures are logged; iteration never aborts.
    pub async fn broadcast_to_room(
        &self,
        room_name: &str,
        message: ServerFrame,
        exclude: Option<&str>,
        require_capability: Option<fn(&Capabilities) -> bool>,
    ) {
        let inner = self.inner.read().await;
        for (id, record) in inner.devices.iter() {
            if record.device.room_name != room_name {
                continue;
            }
            if exclude.is_some_and(|ex| ex == id) {
                continue;
            }
            if let Some(predicate) = require_capability {
                if !predicate(&record.device.capabilities) {
                    continue;
                }
            }
            if record.channel.send(message.clone()).is_err() {
                warn!(device_id = %id, "broadcast_to_room: channel closed");
            }
        }
    }

    /// Broadcast to every device regardless of room (used for room-less
    /// notifications, spec §4.6).
    pub async fn broadcast_all(
        &self,
        message: ServerFrame,
        require_capability: Option<fn(&Capabilities) -> bool>,
    ) {
        let inner = self.inner.read().await;
        for (id, record) in inner.devices.iter() {
            if let Some(predicate) = require_capability {
                if !predicate(&record.device.capabilities) {
                    continue;
                }
            }
            if record.channel.send(message.clone()).is_err() {
                warn!(device_id = %id, "broadcast_all: channel closed");
            }
        }
    }

    /// `cleanup_stale()` (spec §4.1): runs under the registry lock. Sessions
    /// over `max_duration_seconds` end with `reason=timeout`; devices whose
    /// heartbeat is older than the configured timeout are removed and their
    /// sessions ended with `reason=disconnect`.
    pub async fn cleanup_stale(&self) {
        let heartbeat_timeout =
            chrono::Duration::from_std(self.config.heartbeat_timeout()).unwrap_or_default();
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let timed_out_sessions: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.session_id.clone())
            .collect();
        for session_id in timed_out_sessions {
            Self::end_session_locked(&mut inner, &session_id, SessionEndReason::Timeout);
        }

        let stale_devices: Vec<String> = inner
            .devices
            .values()
            .filter(|r| now - r.device.last_heartbeat > heartbeat_timeout)
            .map(|r| r.device.device_id.clone())
            .collect();
        for device_id in &stale_devices {
            if let Some(record) = inner.devices.get(device_id) {
                if let Some(session_id) = record.device.current_session_id.clone() {
                    Self::end_session_locked(&mut inner, &session_id, SessionEndReason::Disconnect);
                }
            }
            inner.devices.remove(device_id);
            info!(device_id = %device_id, "device reaped after heartbeat timeout");
        }
    }

    /// Shared helper used by `session.rs`'s `end_session` and by this
    /// module's disconnect/timeout paths; kept crate-visible so both sides
    /// of the C1/C2 split can call it without re-acquiring the lock.
    pub(crate) fn end_session_locked(
        inner: &mut RegistryInner,
        session_id: &str,
        reason: SessionEndReason,
    ) {
        let Some(session) = inner.sessions.remove(session_id) else { return };
        if let Some(record) = inner.devices.get_mut(&session.device_id) {
            record.device.state = DeviceState::Idle;
            record.device.current_session_id = None;
            let _ = record.channel.send(ServerFrame::SessionEnd {
                session_id: session_id.to_owned(),
                reason,
            });
            let _ = record.channel.send(ServerFrame::State { state: DeviceState::Idle.as_str().to_owned() });
        }
    }
}

/// Spawn the internal reaper that periodically calls `cleanup_stale`.
pub fn spawn_reaper(registry: Arc<Registry>, shutdown: tokio_util::sync::CancellationToken) {
    let interval = registry.config.reaper_interval();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            registry.cleanup_stale().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Registry {
        Registry::new(Arc::new(test_config()))
    }

    fn test_config() -> RenfieldConfig {
        use clap::Parser;
        #[derive(clap::Parser)]
        struct Harness {
            #[command(flatten)]
            cfg: RenfieldConfig,
        }
        Harness::parse_from(["renfield"]).cfg
    }

    fn channel() -> (mpsc::UnboundedSender<ServerFrame>, mpsc::UnboundedReceiver<ServerFrame>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn register_then_unregister_removes_device() {
        let registry = test_registry();
        let (tx, _rx) = channel();
        registry
            .register(
                "d1".into(),
                DeviceType::Satellite,
                "Kitchen".into(),
                DeviceType::Satellite.default_capabilities(),
                DeviceMetadata::default(),
                true,
                tx,
            )
            .await;
        assert!(registry.get_device("d1").await.is_some());
        registry.unregister("d1").await;
        assert!(registry.get_device("d1").await.is_none());
    }

    #[tokio::test]
    async fn reregistration_force_closes_prior_channel() {
        let registry = test_registry();
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = channel();
        registry
            .register(
                "d1".into(),
                DeviceType::Satellite,
                "Kitchen".into(),
                DeviceType::Satellite.default_capabilities(),
                DeviceMetadata::default(),
                true,
                tx1,
            )
            .await;
        registry
            .register(
                "d1".into(),
                DeviceType::Satellite,
                "Kitchen".into(),
                DeviceType::Satellite.default_capabilities(),
                DeviceMetadata::default(),
                true,
                tx2,
            )
            .await;
        // Old sender was dropped by the registry; the old receiver observes closure.
        assert!(rx1.recv().await.is_none());
    }

    #[tokio::test]
    async fn broadcast_to_room_skips_other_rooms_and_excluded() {
        let registry = test_registry();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry
            .register(
                "d1".into(),
                DeviceType::Satellite,
                "Kitchen".into(),
                DeviceType::Satellite.default_capabilities(),
                DeviceMetadata::default(),
                true,
                tx1,
            )
            .await;
        registry
            .register(
                "d2".into(),
                DeviceType::Satellite,
                "Bedroom".into(),
                DeviceType::Satellite.default_capabilities(),
                DeviceMetadata::default(),
                true,
                tx2,
            )
            .await;
        registry
            .broadcast_to_room("Kitchen", ServerFrame::State { state: "idle".into() }, None, None)
            .await;
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn cleanup_stale_reaps_devices_past_heartbeat_timeout() {
        let registry = test_registry();
        let (tx, _rx) = channel();
        registry
            .register(
                "d1".into(),
                DeviceType::Satellite,
                "Kitchen".into(),
                DeviceType::Satellite.default_capabilities(),
                DeviceMetadata::default(),
                true,
                tx,
            )
            .await;
        {
            let mut inner = registry.inner.write().await;
            let record = inner.devices.get_mut("d1").unwrap();
            record.device.last_heartbeat = Utc::now() - chrono::Duration::hours(1);
        }
        registry.cleanup_stale().await;
        assert!(registry.get_device("d1").await.is_none());
    }
}
