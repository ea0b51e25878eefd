// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output Router (C5) — picks the best available audio/visual sink for a
//! room and, for bridge-backed sinks, schedules a volume restore once
//! playback is expected to have finished (spec §4.5).

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RenfieldConfig;
use crate::devices::Registry;
use crate::external::bridge::{BridgeClient, BridgeEntityState};
use crate::external::persistence::PersistenceStore;
use crate::room::{OutputTarget, OutputType, RoomOutputDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Busy,
    Off,
    Unavailable,
}

/// Which kind of sink `target_id` names (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Local,
    Bridge,
}

/// Result of `route()`: either a selected sink, or a fallback signal telling
/// the caller to use the session's own input device instead.
#[derive(Debug, Clone)]
pub struct OutputDecision {
    pub device: Option<RoomOutputDevice>,
    pub target_id: String,
    pub target_type: Option<TargetType>,
    pub availability: Option<Availability>,
    pub fallback_to_input: bool,
    pub reason: &'static str,
}

pub struct OutputRouter {
    registry: Arc<Registry>,
    store: Arc<dyn PersistenceStore>,
    bridge: Arc<dyn BridgeClient>,
    probe_timeout: std::time::Duration,
    pcm_rate_bytes_per_sec: u64,
    restore_margin: std::time::Duration,
}

impl OutputRouter {
    pub fn new(
        config: &RenfieldConfig,
        registry: Arc<Registry>,
        store: Arc<dyn PersistenceStore>,
        bridge: Arc<dyn BridgeClient>,
    ) -> Self {
        Self {
            registry,
            store,
            bridge,
            probe_timeout: config.router_probe_timeout(),
            pcm_rate_bytes_per_sec: config.bridge_pcm_rate_bytes_per_sec,
            restore_margin: std::time::Duration::from_millis(config.bridge_volume_restore_margin_ms),
        }
    }

    /// `get_audio_output_for_room` / `get_visual_output_for_room` (spec
    /// §4.5), unified on `output_type` since the algorithm is identical.
    pub async fn route(
        &self,
        room_id: &str,
        output_type: OutputType,
        input_device_id: Option<&str>,
    ) -> OutputDecision {
        let devices = match self.store.list_room_output_devices(room_id, output_type).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(room_id, err = %e, "failed to load output devices, falling back to input");
                return self.fallback(input_device_id, "store_error");
            }
        };

        if devices.is_empty() {
            debug!(room_id, "no output devices configured for room");
            return self.fallback(input_device_id, "no_output_devices_configured");
        }

        for device in devices {
            let availability = self.probe(&device).await;
            match availability {
                Availability::Available => {
                    info!(room_id, device_id = %device.id, "selected output device (available)");
                    return OutputDecision {
                        target_id: target_id_of(&device),
                        target_type: Some(target_type_of(&device)),
                        availability: Some(availability),
                        device: Some(device),
                        fallback_to_input: false,
                        reason: "device_available",
                    };
                }
                Availability::Busy if device.allow_interruption => {
                    info!(room_id, device_id = %device.id, "selected output device (busy, interrupting)");
                    return OutputDecision {
                        target_id: target_id_of(&device),
                        target_type: Some(target_type_of(&device)),
                        availability: Some(availability),
                        device: Some(device),
                        fallback_to_input: false,
                        reason: "device_busy_allowing_interruption",
                    };
                }
                Availability::Busy => {
                    debug!(room_id, device_id = %device.id, "skipping busy device, no interruption allowed");
                }
                Availability::Off | Availability::Unavailable => {
                    debug!(room_id, device_id = %device.id, "skipping unavailable device");
                }
            }
        }

        info!(room_id, "no suitable output device, falling back to input device");
        self.fallback(input_device_id, "all_devices_unavailable")
    }

    fn fallback(&self, input_device_id: Option<&str>, reason: &'static str) -> OutputDecision {
        OutputDecision {
            device: None,
            target_id: input_device_id.unwrap_or("").to_owned(),
            target_type: None,
            availability: None,
            fallback_to_input: true,
            reason,
        }
    }

    async fn probe(&self, device: &RoomOutputDevice) -> Availability {
        let result = tokio::time::timeout(self.probe_timeout, async {
            match &device.target {
                OutputTarget::Local { device_id } => self.probe_local(device_id).await,
                OutputTarget::Bridge { entity_id } => self.probe_bridge(entity_id).await,
            }
        })
        .await;
        result.unwrap_or(Availability::Unavailable)
    }

    async fn probe_local(&self, device_id: &str) -> Availability {
        let Some(device) = self.registry.get_device(device_id).await else {
            return Availability::Unavailable;
        };
        if !device.capabilities.has_speaker() {
            return Availability::Unavailable;
        }
        use crate::devices::DeviceState;
        match device.state {
            DeviceState::Speaking => Availability::Busy,
            DeviceState::Idle | DeviceState::Processing | DeviceState::Listening => Availability::Available,
            DeviceState::Error => Availability::Unavailable,
        }
    }

    async fn probe_bridge(&self, entity_id: &str) -> Availability {
        match self.bridge.get_entity_state(entity_id).await {
            Ok(BridgeEntityState::Idle | BridgeEntityState::Paused | BridgeEntityState::Standby | BridgeEntityState::On) => {
                Availability::Available
            }
            Ok(BridgeEntityState::Playing | BridgeEntityState::Buffering) => Availability::Busy,
            Ok(BridgeEntityState::Off) => Availability::Off,
            Ok(BridgeEntityState::Unknown) | Err(_) => Availability::Unavailable,
        }
    }

    /// Play `audio_url` on a bridge-backed sink, setting its volume first
    /// (if configured) and scheduling a restore once playback should have
    /// finished. The estimate used for "should have finished" is the PCM
    /// byte length over the configured calibration rate, plus a margin —
    /// the bridge surface gives us no reliable playback-complete event.
    pub async fn play_on_bridge(&self, entity_id: &str, audio_url: &str, tts_volume: Option<f32>, pcm_bytes: usize) {
        let prior_volume = if tts_volume.is_some() {
            self.bridge.get_volume(entity_id).await.ok()
        } else {
            None
        };

        if let Some(volume) = tts_volume {
            if let Err(e) = self.bridge.set_volume(entity_id, volume).await {
                warn!(entity_id, err = %e, "failed to set bridge volume before playback");
            }
        }

        if let Err(e) = self.bridge.play_audio(entity_id, audio_url).await {
            warn!(entity_id, err = %e, "failed to start bridge playback");
            return;
        }

        let Some(prior_volume) = prior_volume else { return };
        let estimated_playback =
            std::time::Duration::from_secs_f64(pcm_bytes as f64 / self.pcm_rate_bytes_per_sec.max(1) as f64);
        let restore_after = estimated_playback + self.restore_margin;

        let bridge = Arc::clone(&self.bridge);
        let entity_id = entity_id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(restore_after).await;
            if let Err(e) = bridge.set_volume(&entity_id, prior_volume).await {
                warn!(entity_id, err = %e, "failed to restore bridge volume after playback");
            }
        });
    }
}

fn target_id_of(device: &RoomOutputDevice) -> String {
    match &device.target {
        OutputTarget::Local { device_id } => device_id.clone(),
        OutputTarget::Bridge { entity_id } => entity_id.clone(),
    }
}

fn target_type_of(device: &RoomOutputDevice) -> TargetType {
    match &device.target {
        OutputTarget::Local { .. } => TargetType::Local,
        OutputTarget::Bridge { .. } => TargetType::Bridge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceMetadata, DeviceType};
    use crate::external::bridge::test_support::FakeBridge;
    use crate::external::persistence::InMemoryStore;
    use clap::Parser;
    use tokio::sync::mpsc;

    fn test_config() -> RenfieldConfig {
        #[derive(clap::Parser)]
        struct Harness {
            #[command(flatten)]
            cfg: RenfieldConfig,
        }
        Harness::parse_from(["renfield"]).cfg
    }

    fn output_device(id: &str, priority: u32, target: OutputTarget, allow_interruption: bool) -> RoomOutputDevice {
        RoomOutputDevice {
            id: id.to_owned(),
            room_id: "room-1".into(),
            output_type: OutputType::Audio,
            target,
            priority,
            allow_interruption,
            tts_volume: Some(0.5),
            device_name: None,
            is_enabled: true,
        }
    }

    #[tokio::test]
    async fn falls_back_to_input_when_nothing_configured() {
        let config = test_config();
        let registry = Arc::new(Registry::new(Arc::new(config.clone())));
        let store = InMemoryStore::new();
        let bridge = Arc::new(FakeBridge::default());
        let router = OutputRouter::new(&config, registry, store, bridge);

        let decision = router.route("room-1", OutputType::Audio, Some("d1")).await;
        assert!(decision.fallback_to_input);
        assert_eq!(decision.target_id, "d1");
    }

    #[tokio::test]
    async fn prefers_available_device_over_busy_without_interruption() {
        let config = test_config();
        let registry = Arc::new(Registry::new(Arc::new(config.clone())));
        let store = InMemoryStore::new();
        store
            .upsert_room_output_device(output_device(
                "o1",
                1,
                OutputTarget::Bridge { entity_id: "speaker.kitchen".into() },
                false,
            ))
            .await
            .unwrap();
        store
            .upsert_room_output_device(output_device(
                "o2",
                2,
                OutputTarget::Bridge { entity_id: "speaker.living".into() },
                false,
            ))
            .await
            .unwrap();

        let bridge = Arc::new(FakeBridge::with_state("speaker.kitchen", BridgeEntityState::Playing));
        bridge.states.lock().unwrap().insert("speaker.living".into(), BridgeEntityState::Idle);
        let router = OutputRouter::new(&config, registry, store, bridge);

        let decision = router.route("room-1", OutputType::Audio, None).await;
        assert!(!decision.fallback_to_input);
        assert_eq!(decision.target_id, "speaker.living");
    }

    #[tokio::test]
    async fn busy_device_selected_when_interruption_allowed() {
        let config = test_config();
        let registry = Arc::new(Registry::new(Arc::new(config.clone())));
        let store = InMemoryStore::new();
        store
            .upsert_room_output_device(output_device(
                "o1",
                1,
                OutputTarget::Bridge { entity_id: "speaker.kitchen".into() },
                true,
            ))
            .await
            .unwrap();
        let bridge = Arc::new(FakeBridge::with_state("speaker.kitchen", BridgeEntityState::Playing));
        let router = OutputRouter::new(&config, registry, store, bridge);

        let decision = router.route("room-1", OutputType::Audio, None).await;
        assert!(!decision.fallback_to_input);
        assert_eq!(decision.reason, "device_busy_allowing_interruption");
    }

    #[tokio::test]
    async fn local_device_probed_via_registry_state() {
        let config = test_config();
        let registry = Arc::new(Registry::new(Arc::new(config.clone())));
        let (tx, _rx) = mpsc::unbounded_channel();
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
        let store = InMemoryStore::new();
        store
            .upsert_room_output_device(output_device("o1", 1, OutputTarget::Local { device_id: "d1".into() }, false))
            .await
            .unwrap();
        let bridge = Arc::new(FakeBridge::default());
        let router = OutputRouter::new(&config, registry, store, bridge);

        let decision = router.route("room-1", OutputType::Audio, None).await;
        assert!(!decision.fallback_to_input);
        assert_eq!(decision.target_id, "d1");
        assert_eq!(decision.target_type, Some(TargetType::Local));
        assert_eq!(decision.availability, Some(Availability::Available));
    }

    #[tokio::test]
    async fn fallback_decision_carries_no_target_type_or_availability() {
        let config = test_config();
        let registry = Arc::new(Registry::new(Arc::new(config.clone())));
        let store = InMemoryStore::new();
        let bridge = Arc::new(FakeBridge::default());
        let router = OutputRouter::new(&config, registry, store, bridge);

        let decision = router.route("room-1", OutputType::Audio, Some("d1")).await;
        assert_eq!(decision.target_type, None);
        assert_eq!(decision.availability, None);
    }
}
