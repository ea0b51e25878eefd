// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wake-Word Config Fabric (C3) — single source of truth for the wake-word
//! configuration used by every endpoint performing local detection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::config::RenfieldConfig;
use crate::error::RenfieldError;
use crate::transport::ws_msg::ServerFrame;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeWordConfig {
    pub keyword: String,
    pub threshold: f32,
    pub cooldown_ms: u32,
    pub enabled: bool,
}

/// Fields accepted by `update_config`; `None` means "leave unchanged".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WakeWordConfigPatch {
    pub keyword: Option<String>,
    pub threshold: Option<f32>,
    pub cooldown_ms: Option<u32>,
}

fn validate_patch(patch: &WakeWordConfigPatch) -> Result<(), RenfieldError> {
    if let Some(t) = patch.threshold {
        if !(0.1..=1.0).contains(&t) {
            return Err(RenfieldError::Validation);
        }
    }
    if let Some(c) = patch.cooldown_ms {
        if !(500..=10_000).contains(&c) {
            return Err(RenfieldError::Validation);
        }
    }
    if let Some(ref k) = patch.keyword {
        if k.trim().is_empty() {
            return Err(RenfieldError::Validation);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    PendingSync,
    Synced,
}

pub struct Subscriber {
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub channel: mpsc::UnboundedSender<ServerFrame>,
    pub config_version: u64,
}

/// Per-device ack bookkeeping, keyed by `device_id`. Kept separate from
/// `subscribers` so a disconnect (which drops the channel-bearing
/// `Subscriber`) never loses the last-known sync state (spec §4.3).
#[derive(Debug, Clone)]
struct DeviceSyncRecord {
    sync_state: SyncState,
    config_version: u64,
    active_keywords: Vec<String>,
    failed_keywords: Vec<String>,
    last_error: Option<String>,
}

/// C3 holds its own lock over the subscriber set and sync map, independent
/// of the C1/C2 device/session lock (see DESIGN.md for why — broadcasting a
/// config update must never block on audio-buffering critical sections).
pub struct WakeWordFabric {
    config: RwLock<WakeWordConfig>,
    config_version: std::sync::atomic::AtomicU64,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    device_sync: RwLock<HashMap<String, DeviceSyncRecord>>,
}

impl WakeWordFabric {
    pub fn new(defaults: &RenfieldConfig) -> Self {
        Self {
            config: RwLock::new(WakeWordConfig {
                keyword: defaults.wake_word_default.clone(),
                threshold: defaults.wake_word_threshold_default,
                cooldown_ms: defaults.wake_word_cooldown_ms_default,
                enabled: defaults.wake_word_enabled,
            }),
            config_version: std::sync::atomic::AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            device_sync: RwLock::new(HashMap::new()),
        }
    }

    /// `get_config()` (spec §4.3).
    pub async fn get_config(&self) -> WakeWordConfig {
        self.config.read().await.clone()
    }

    pub fn version(&self) -> u64 {
        self.config_version.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// `update_config(partial)` (spec §4.3): validates, writes, bumps
    /// `config_version`, marks all known devices pending-sync, broadcasts.
    /// Invalid fields fail without side effects.
    pub async fn update_config(&self, patch: WakeWordConfigPatch) -> Result<WakeWordConfig, RenfieldError> {
        validate_patch(&patch)?;

        let mut config = self.config.write().await;
        if let Some(k) = patch.keyword {
            config.keyword = k;
        }
        if let Some(t) = patch.threshold {
            config.threshold = t;
        }
        if let Some(c) = patch.cooldown_ms {
            config.cooldown_ms = c;
        }
        let new_version = self.config_version.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let snapshot = config.clone();
        drop(config);

        let update_json = serde_json::to_value(&snapshot).unwrap_or_default();
        let mut subscribers = self.subscribers.write().await;
        let mut device_sync = self.device_sync.write().await;
        let mut dead = Vec::new();
        for (id, sub) in subscribers.iter_mut() {
            sub.config_version = new_version;
            if let Some(ref device_id) = sub.device_id {
                if let Some(record) = device_sync.get_mut(device_id) {
                    record.sync_state = SyncState::PendingSync;
                    record.config_version = new_version;
                }
            }
            let frame = ServerFrame::ConfigUpdate { config: update_json.clone(), config_version: new_version };
            if sub.channel.send(frame).is_err() {
                dead.push(id.clone());
            }
        }
        for id in dead {
            subscribers.remove(&id);
        }

        Ok(snapshot)
    }

    /// `subscribe(channel, device_id?, device_type?)` (spec §4.3). New device
    /// entries start pending-sync.
    pub async fn subscribe(
        &self,
        subscriber_id: String,
        device_id: Option<String>,
        device_type: Option<String>,
        channel: mpsc::UnboundedSender<ServerFrame>,
    ) {
        let version = self.version();
        if let Some(ref device_id) = device_id {
            self.device_sync.write().await.entry(device_id.clone()).or_insert_with(|| DeviceSyncRecord {
                sync_state: SyncState::PendingSync,
                config_version: version,
                active_keywords: Vec::new(),
                failed_keywords: Vec::new(),
                last_error: None,
            });
        }
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(subscriber_id, Subscriber { device_id, device_type, channel, config_version: version });
    }

    /// `unsubscribe(channel)` (spec §4.3). Drops the live channel only; the
    /// device's sync status in `device_sync` survives so a reconnect or a
    /// status query still reflects the last-known ack.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.write().await.remove(subscriber_id);
    }

    /// `handle_config_ack(device_id, success, active_keywords, failed_keywords, error)`
    /// (spec §4.3). `synced=true` requires `success=true`.
    pub async fn handle_config_ack(
        &self,
        subscriber_id: &str,
        success: bool,
        active_keywords: Vec<String>,
        failed_keywords: Vec<String>,
        error: Option<String>,
    ) {
        let subscribers = self.subscribers.read().await;
        let Some(sub) = subscribers.get(subscriber_id) else {
            warn!(subscriber_id, "config_ack from unknown subscriber");
            return;
        };
        let Some(ref device_id) = sub.device_id else {
            warn!(subscriber_id, "config_ack from subscriber with no device_id");
            return;
        };
        let mut device_sync = self.device_sync.write().await;
        let record = device_sync.entry(device_id.clone()).or_insert_with(|| DeviceSyncRecord {
            sync_state: SyncState::PendingSync,
            config_version: sub.config_version,
            active_keywords: Vec::new(),
            failed_keywords: Vec::new(),
            last_error: None,
        });
        record.active_keywords = active_keywords;
        record.failed_keywords = failed_keywords;
        record.last_error = error;
        record.sync_state = if success { SyncState::Synced } else { SyncState::PendingSync };
    }

    /// `get_device_sync_status(device_id?)` (spec §4.3). Reads from
    /// `device_sync`, so a device's last-known ack still reports correctly
    /// after it disconnects.
    pub async fn get_device_sync_status(&self, device_id: Option<&str>) -> SyncStatusReport {
        let device_sync = self.device_sync.read().await;
        let current_version = self.version();

        if let Some(device_id) = device_id {
            let entry = device_sync.get(device_id);
            return SyncStatusReport {
                config_version: current_version,
                synced_count: entry.filter(|s| s.sync_state == SyncState::Synced).is_some() as u32,
                pending_count: entry.filter(|s| s.sync_state != SyncState::Synced).is_some() as u32,
                all_synced: entry.map(|s| s.sync_state == SyncState::Synced).unwrap_or(false),
            };
        }

        let synced_count = device_sync.values().filter(|s| s.sync_state == SyncState::Synced).count() as u32;
        let pending_count = device_sync.len() as u32 - synced_count;
        SyncStatusReport {
            config_version: current_version,
            synced_count,
            pending_count,
            all_synced: pending_count == 0 && !device_sync.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusReport {
    pub config_version: u64,
    pub synced_count: u32,
    pub pending_count: u32,
    pub all_synced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_config() -> RenfieldConfig {
        #[derive(clap::Parser)]
        struct Harness {
            #[command(flatten)]
            cfg: RenfieldConfig,
        }
        Harness::parse_from(["renfield"]).cfg
    }

    #[tokio::test]
    async fn update_config_rejects_out_of_range_threshold() {
        let fabric = WakeWordFabric::new(&test_config());
        let patch = WakeWordConfigPatch { threshold: Some(1.5), ..Default::default() };
        let before = fabric.get_config().await;
        let result = fabric.update_config(patch).await;
        assert!(result.is_err());
        let after = fabric.get_config().await;
        assert_eq!(before.threshold, after.threshold);
    }

    #[tokio::test]
    async fn config_roundtrip_syncs_half_of_subscribers() {
        let fabric = WakeWordFabric::new(&test_config());
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        fabric.subscribe("a".into(), Some("a".into()), None, tx_a).await;
        fabric.subscribe("b".into(), Some("b".into()), None, tx_b).await;

        let updated = fabric
            .update_config(WakeWordConfigPatch { keyword: Some("hey_mycroft".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.keyword, "hey_mycroft");

        fabric.handle_config_ack("a", true, vec!["hey_mycroft".into()], vec![], None).await;

        let status = fabric.get_device_sync_status(None).await;
        assert_eq!(status.synced_count, 1);
        assert_eq!(status.pending_count, 1);
        assert!(!status.all_synced);
    }

    #[tokio::test]
    async fn failed_ack_never_marks_synced() {
        let fabric = WakeWordFabric::new(&test_config());
        let (tx, _rx) = mpsc::unbounded_channel();
        fabric.subscribe("a".into(), Some("a".into()), None, tx).await;
        fabric.handle_config_ack("a", false, vec![], vec!["hey_mycroft".into()], Some("dsp error".into())).await;
        let status = fabric.get_device_sync_status(Some("a")).await;
        assert!(!status.all_synced);
    }

    #[tokio::test]
    async fn sync_status_survives_unsubscribe() {
        let fabric = WakeWordFabric::new(&test_config());
        let (tx, _rx) = mpsc::unbounded_channel();
        fabric.subscribe("a".into(), Some("a".into()), None, tx).await;
        fabric.handle_config_ack("a", true, vec!["hey_mycroft".into()], vec![], None).await;

        fabric.unsubscribe("a").await;

        let status = fabric.get_device_sync_status(Some("a")).await;
        assert!(status.all_synced);
        assert_eq!(status.synced_count, 1);
    }
}
