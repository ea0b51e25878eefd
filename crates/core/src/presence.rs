// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence Tracker (C4) — maps radio sightings to user-in-room assignments
//! with hysteresis and multi-observer aggregation. Purely in-memory; no I/O
//! happens inside the tracker itself (ported & extended from
//! `presence_service.py`'s strongest-RSSI-wins scheme to the weighted
//! aggregate-with-satellite-coverage algorithm spec §4.4 calls for).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::config::RenfieldConfig;

#[derive(Debug, Clone)]
pub struct DeviceSighting {
    pub satellite_id: String,
    pub room_id: String,
    pub rssi: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPresence {
    pub user_id: String,
    pub room_id: String,
    pub room_name: Option<String>,
    pub satellite_id: String,
    pub confidence: f32,
    pub last_seen: DateTime<Utc>,
    pub consecutive_room_count: u32,
    #[serde(skip)]
    pending_room_id: Option<String>,
    #[serde(skip)]
    pending_count: u32,
}

/// One incoming `{mac, rssi}` pair from a BLE scan report.
#[derive(Debug, Clone)]
pub struct BleReportDevice {
    pub mac: String,
    pub rssi: i32,
}

/// Hook payload emitted on presence transitions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum PresenceEvent {
    EnterRoom { user_id: String, room_id: String, room_name: Option<String> },
    LeaveRoom { user_id: String, room_id: String, room_name: Option<String> },
    FirstArrived { user_id: String, room_id: String, room_name: Option<String> },
    LastLeft { user_id: String, room_id: String, room_name: Option<String> },
}

struct TrackerState {
    mac_to_user: HashMap<String, String>,
    sightings: HashMap<String, VecDeque<DeviceSighting>>,
    presence: HashMap<String, UserPresence>,
    room_names: HashMap<String, String>,
}

pub struct PresenceTracker {
    state: Mutex<TrackerState>,
    events: broadcast::Sender<PresenceEvent>,
    rssi_threshold: i32,
    stale_timeout: chrono::Duration,
    hysteresis_scans: u32,
}

impl PresenceTracker {
    pub fn new(config: &RenfieldConfig) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            state: Mutex::new(TrackerState {
                mac_to_user: HashMap::new(),
                sightings: HashMap::new(),
                presence: HashMap::new(),
                room_names: HashMap::new(),
            }),
            events,
            rssi_threshold: config.presence_rssi_threshold,
            stale_timeout: chrono::Duration::seconds(config.presence_stale_timeout_secs as i64),
            hysteresis_scans: config.presence_hysteresis_scans,
        }
    }

    /// Load the MAC -> user mapping from persistence at startup.
    pub async fn load_device_registry(&self, mac_to_user: HashMap<String, String>) {
        self.state.lock().await.mac_to_user = mac_to_user;
    }

    pub async fn register_ble_device(&self, mac: String, user_id: String) {
        self.state.lock().await.mac_to_user.insert(mac.to_uppercase(), user_id);
    }

    pub async fn remove_ble_device(&self, mac: &str) {
        let mut state = self.state.lock().await;
        let mac = mac.to_uppercase();
        state.mac_to_user.remove(&mac);
        state.sightings.remove(&mac);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// `process_ble_report(satellite_id, room_id, devices[], room_name?)`
    /// (spec §4.4). Unknown MACs are silently ignored.
    pub async fn process_ble_report(
        &self,
        satellite_id: &str,
        room_id: Option<&str>,
        devices: &[BleReportDevice],
        room_name: Option<&str>,
    ) {
        let now = Utc::now();
        let mut events = Vec::new();

        {
            let mut state = self.state.lock().await;

            if let (Some(room_id), Some(room_name)) = (room_id, room_name) {
                state.room_names.insert(room_id.to_owned(), room_name.to_owned());
            }

            for device in devices {
                let mac = device.mac.to_uppercase();
                let Some(user_id) = state.mac_to_user.get(&mac).cloned() else { continue };
                let Some(room_id) = room_id else { continue };

                if device.rssi < self.rssi_threshold {
                    continue;
                }

                let ring = state.sightings.entry(mac.clone()).or_default();
                ring.push_back(DeviceSighting {
                    satellite_id: satellite_id.to_owned(),
                    room_id: room_id.to_owned(),
                    rssi: device.rssi,
                    timestamp: now,
                });
                while ring.front().is_some_and(|s| now - s.timestamp > self.stale_timeout) {
                    ring.pop_front();
                }

                self.assign_room(&mut state, &user_id, &mac, now, &mut events);
            }

            self.cleanup_stale(&mut state, now, &mut events);
        }

        for event in events {
            let _ = self.events.send(event);
        }
    }

    /// Step 3-5 of spec §4.4: aggregate weighted RSSI per candidate room,
    /// commit the winner subject to hysteresis, compute confidence.
    fn assign_room(
        &self,
        state: &mut TrackerState,
        user_id: &str,
        mac: &str,
        now: DateTime<Utc>,
        events: &mut Vec<PresenceEvent>,
    ) {
        let Some(sightings) = state.sightings.get(mac) else { return };
        if sightings.is_empty() {
            return;
        }

        // Aggregate per candidate room: best single RSSI (70%) + satellite
        // coverage factor (30%), weighted as spec §4.4 step 3 describes.
        let mut per_room: HashMap<String, (f32, std::collections::HashSet<String>, i32, String)> =
            HashMap::new();
        for sighting in sightings {
            let score = clamp01((sighting.rssi as f32 + 90.0) / 60.0);
            let entry = per_room.entry(sighting.room_id.clone()).or_insert_with(|| {
                (score, std::collections::HashSet::new(), sighting.rssi, sighting.satellite_id.clone())
            });
            entry.1.insert(sighting.satellite_id.clone());
            if sighting.rssi > entry.2 {
                entry.2 = sighting.rssi;
                entry.0 = score;
                entry.3 = sighting.satellite_id.clone();
            }
        }

        let mut best_room: Option<(String, f32, String)> = None;
        for (room_id, (best_score, sats, _best_rssi, best_sat)) in per_room {
            let coverage = (sats.len() as f32 / 3.0).min(1.0);
            let aggregate = clamp01(0.7 * best_score + 0.3 * coverage);
            if best_room.as_ref().is_none_or(|(_, score, _)| aggregate > *score) {
                best_room = Some((room_id, aggregate, best_sat));
            }
        }
        let Some((winning_room, aggregate_score, winning_sat)) = best_room else { return };

        let room_name = state.room_names.get(&winning_room).cloned();

        match state.presence.get_mut(user_id) {
            None => {
                // First assignment ever commits immediately.
                state.presence.insert(
                    user_id.to_owned(),
                    UserPresence {
                        user_id: user_id.to_owned(),
                        room_id: winning_room.clone(),
                        room_name: room_name.clone(),
                        satellite_id: winning_sat,
                        confidence: aggregate_score,
                        last_seen: now,
                        consecutive_room_count: 1,
                        pending_room_id: None,
                        pending_count: 0,
                    },
                );
                let house_was_empty = state.presence.len() == 1;
                events.push(PresenceEvent::EnterRoom {
                    user_id: user_id.to_owned(),
                    room_id: winning_room.clone(),
                    room_name: room_name.clone(),
                });
                if house_was_empty {
                    events.push(PresenceEvent::FirstArrived {
                        user_id: user_id.to_owned(),
                        room_id: winning_room,
                        room_name,
                    });
                }
            }
            Some(current) => {
                current.last_seen = now;
                current.confidence = aggregate_score;
                if current.room_id == winning_room {
                    // Reinforce: each matching scan resets the counter rather
                    // than letting it grow unbounded (spec §4.4 step 4).
                    current.consecutive_room_count = 1;
                    current.satellite_id = winning_sat;
                    current.pending_room_id = None;
                    current.pending_count = 0;
                } else {
                    if current.pending_room_id.as_deref() == Some(winning_room.as_str()) {
                        current.pending_count += 1;
                    } else {
                        current.pending_room_id = Some(winning_room.clone());
                        current.pending_count = 1;
                    }
                    if current.pending_count >= self.hysteresis_scans {
                        let old_room = current.room_id.clone();
                        let old_room_name = current.room_name.clone();
                        current.room_id = winning_room.clone();
                        current.room_name = room_name.clone();
                        current.satellite_id = winning_sat;
                        current.consecutive_room_count = 1;
                        current.pending_room_id = None;
                        current.pending_count = 0;
                        events.push(PresenceEvent::LeaveRoom {
                            user_id: user_id.to_owned(),
                            room_id: old_room,
                            room_name: old_room_name,
                        });
                        events.push(PresenceEvent::EnterRoom {
                            user_id: user_id.to_owned(),
                            room_id: winning_room,
                            room_name,
                        });
                    }
                }
            }
        }
    }

    /// Step 6 of spec §4.4: remove stale presence, emitting `presence_leave_room`.
    fn cleanup_stale(&self, state: &mut TrackerState, now: DateTime<Utc>, events: &mut Vec<PresenceEvent>) {
        let stale: Vec<String> = state
            .presence
            .values()
            .filter(|p| now - p.last_seen > self.stale_timeout)
            .map(|p| p.user_id.clone())
            .collect();

        for user_id in stale {
            if let Some(p) = state.presence.remove(&user_id) {
                events.push(PresenceEvent::LeaveRoom {
                    user_id: user_id.clone(),
                    room_id: p.room_id,
                    room_name: p.room_name,
                });
                if state.presence.is_empty() {
                    events.push(PresenceEvent::LastLeft { user_id, room_id: String::new(), room_name: None });
                }
            }
        }
    }

    pub async fn get_user_presence(&self, user_id: &str) -> Option<UserPresence> {
        self.state.lock().await.presence.get(user_id).cloned()
    }

    pub async fn get_room_occupants(&self, room_id: &str) -> Vec<UserPresence> {
        self.state.lock().await.presence.values().filter(|p| p.room_id == room_id).cloned().collect()
    }

    /// `is_user_alone_in_room(user_id)` (spec §4.4): `None` = untracked.
    pub async fn is_user_alone_in_room(&self, user_id: &str) -> Option<bool> {
        let state = self.state.lock().await;
        let presence = state.presence.get(user_id)?;
        let occupant_count = state.presence.values().filter(|p| p.room_id == presence.room_id).count();
        Some(occupant_count == 1)
    }
}

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
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
        let mut cfg = Harness::parse_from(["renfield"]).cfg;
        cfg.presence_hysteresis_scans = 2;
        cfg
    }

    async fn tracker_with_user(mac: &str, user: &str) -> PresenceTracker {
        let tracker = PresenceTracker::new(&test_config());
        tracker.load_device_registry(HashMap::from([(mac.to_owned(), user.to_owned())])).await;
        tracker
    }

    #[tokio::test]
    async fn unknown_mac_is_ignored() {
        let tracker = tracker_with_user("AA:BB", "user-1").await;
        tracker
            .process_ble_report("sat-1", Some("room-1"), &[BleReportDevice { mac: "ZZ:ZZ".into(), rssi: -40 }], None)
            .await;
        assert!(tracker.get_user_presence("user-1").await.is_none());
    }

    #[tokio::test]
    async fn first_assignment_commits_immediately() {
        let tracker = tracker_with_user("AA:BB", "user-1").await;
        tracker
            .process_ble_report("sat-1", Some("room-10"), &[BleReportDevice { mac: "AA:BB".into(), rssi: -40 }], None)
            .await;
        let presence = tracker.get_user_presence("user-1").await.unwrap();
        assert_eq!(presence.room_id, "room-10");
    }

    #[tokio::test]
    async fn hysteresis_requires_consecutive_scans_before_committing() {
        // Scenario 3 from spec §8: sat-A at -50 in room-10, then three
        // consecutive sat-B reports at -40 in room-20, hysteresis=2.
        let tracker = tracker_with_user("AA:BB", "user-1").await;
        tracker
            .process_ble_report("sat-A", Some("room-10"), &[BleReportDevice { mac: "AA:BB".into(), rssi: -50 }], None)
            .await;
        assert_eq!(tracker.get_user_presence("user-1").await.unwrap().room_id, "room-10");

        tracker
            .process_ble_report("sat-B", Some("room-20"), &[BleReportDevice { mac: "AA:BB".into(), rssi: -40 }], None)
            .await;
        // First differing observation: not enough consecutive scans yet.
        assert_eq!(tracker.get_user_presence("user-1").await.unwrap().room_id, "room-10");

        tracker
            .process_ble_report("sat-B", Some("room-20"), &[BleReportDevice { mac: "AA:BB".into(), rssi: -40 }], None)
            .await;
        // Second consecutive differing observation: commits.
        assert_eq!(tracker.get_user_presence("user-1").await.unwrap().room_id, "room-20");

        tracker
            .process_ble_report("sat-B", Some("room-20"), &[BleReportDevice { mac: "AA:BB".into(), rssi: -40 }], None)
            .await;
        assert_eq!(tracker.get_user_presence("user-1").await.unwrap().room_id, "room-20");
    }

    #[tokio::test]
    async fn rssi_below_threshold_is_dropped() {
        let mut cfg = test_config();
        cfg.presence_rssi_threshold = -80;
        let tracker = PresenceTracker::new(&cfg);
        tracker.load_device_registry(HashMap::from([("AA:BB".to_owned(), "user-1".to_owned())])).await;
        tracker
            .process_ble_report("sat-1", Some("room-1"), &[BleReportDevice { mac: "AA:BB".into(), rssi: -95 }], None)
            .await;
        assert!(tracker.get_user_presence("user-1").await.is_none());
    }

    #[tokio::test]
    async fn is_alone_reports_none_when_untracked() {
        let tracker = tracker_with_user("AA:BB", "user-1").await;
        assert_eq!(tracker.is_user_alone_in_room("user-1").await, None);
    }

    #[tokio::test]
    async fn is_alone_true_with_single_occupant() {
        let tracker = PresenceTracker::new(&test_config());
        tracker
            .load_device_registry(HashMap::from([
                ("AA:BB".to_owned(), "user-1".to_owned()),
                ("CC:DD".to_owned(), "user-2".to_owned()),
            ]))
            .await;
        tracker
            .process_ble_report("sat-1", Some("room-1"), &[BleReportDevice { mac: "AA:BB".into(), rssi: -40 }], None)
            .await;
        assert_eq!(tracker.is_user_alone_in_room("user-1").await, Some(true));

        tracker
            .process_ble_report("sat-1", Some("room-1"), &[BleReportDevice { mac: "CC:DD".into(), rssi: -40 }], None)
            .await;
        assert_eq!(tracker.is_user_alone_in_room("user-1").await, Some(false));
    }
}
