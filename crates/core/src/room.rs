// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rooms, room-bound output devices, and voice-matching alias normalization.

use serde::{Deserialize, Serialize};

/// Where a `Room` record originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomSource {
    Local,
    Bridge,
    DeviceInferred,
}

/// A room: the unit that devices, presence, and output routing are keyed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub alias: String,
    pub bridge_area_id: Option<String>,
    pub source: RoomSource,
    pub icon: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: RoomSource) -> Self {
        let name = name.into();
        let alias = normalize_room_name(&name);
        let now = chrono::Utc::now();
        Self {
            id: id.into(),
            name,
            alias,
            bridge_area_id: None,
            source,
            icon: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Output type a `RoomOutputDevice` serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Audio,
    Visual,
}

/// What a `RoomOutputDevice` actually targets — exactly one of the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputTarget {
    Local { device_id: String },
    Bridge { entity_id: String },
}

/// An ordered candidate sink for a room's audio or visual output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomOutputDevice {
    pub id: String,
    pub room_id: String,
    pub output_type: OutputType,
    pub target: OutputTarget,
    /// 1 = highest priority.
    pub priority: u32,
    pub allow_interruption: bool,
    /// 0.0-1.0, or `None` meaning "leave the sink's current volume unchanged".
    pub tts_volume: Option<f32>,
    pub device_name: Option<String>,
    pub is_enabled: bool,
}

/// Normalize a room name into a voice-matching alias: lowercase, fold the
/// common German umlaut spellings, strip everything but ASCII alphanumerics.
///
/// Idempotent and case-insensitive: `normalize_room_name(normalize_room_name(s))
/// == normalize_room_name(s)`, and inputs differing only by umlaut spelling
/// or ASCII case collapse to the same alias (spec §8).
pub fn normalize_room_name(input: &str) -> String {
    let lower = input.to_lowercase();
    let folded = lower
        .replace('ä', "ae")
        .replace('ö', "oe")
        .replace('ü', "ue")
        .replace('ß', "ss");
    folded.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent() {
        let once = normalize_room_name("Büro (Süd)");
        let twice = normalize_room_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn umlaut_variants_collapse() {
        assert_eq!(normalize_room_name("Büro"), normalize_room_name("Buero"));
        assert_eq!(normalize_room_name("Grüße"), normalize_room_name("Gruesse"));
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(normalize_room_name("Kitchen"), normalize_room_name("KITCHEN"));
        assert_eq!(normalize_room_name("kitchen"), normalize_room_name("KiTcHeN"));
    }

    #[test]
    fn strips_non_alphanumerics() {
        assert_eq!(normalize_room_name("Living Room #2!"), "livingroom2");
    }

    #[test]
    fn room_new_derives_alias() {
        let room = Room::new("r1", "Büro", RoomSource::Local);
        assert_eq!(room.alias, "buero");
    }

    proptest::proptest! {
        #[test]
        fn normalize_room_name_is_idempotent_for_any_input(s in ".*") {
            let once = normalize_room_name(&s);
            let twice = normalize_room_name(&once);
            proptest::prop_assert_eq!(once, twice);
        }

        #[test]
        fn normalize_room_name_output_is_always_lowercase_ascii_alphanumeric(s in ".*") {
            let alias = normalize_room_name(&s);
            proptest::prop_assert!(alias.chars().all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_uppercase()));
        }
    }
}
