// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket frame shapes exchanged with edge devices (spec §6).

use serde::{Deserialize, Serialize};

/// Frames sent by an edge device to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Register {
        device_id: String,
        device_type: String,
        room: String,
        capabilities: serde_json::Value,
        #[serde(default)]
        device_name: Option<String>,
        #[serde(default)]
        is_stationary: Option<bool>,
        #[serde(default)]
        version: Option<String>,
    },
    Heartbeat {
        #[serde(default)]
        metrics: Option<serde_json::Value>,
        #[serde(default)]
        version: Option<String>,
    },
    Wakeword {
        keyword: String,
        confidence: f32,
        #[serde(default)]
        session_id: Option<String>,
    },
    Audio {
        session_id: String,
        /// base64-encoded PCM-16LE, 16kHz, mono.
        audio: String,
        sequence: u64,
    },
    AudioEnd {
        session_id: String,
    },
    Button {
        action: ButtonAction,
    },
    BleReport {
        #[serde(default)]
        room_id: Option<String>,
        devices: Vec<BleSighting>,
        #[serde(default)]
        room_name: Option<String>,
    },
    ConfigAck {
        config_version: u64,
        success: bool,
        #[serde(default)]
        active_keywords: Vec<String>,
        #[serde(default)]
        failed_keywords: Vec<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    Press,
    Release,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BleSighting {
    pub mac: String,
    pub rssi: i32,
}

/// Reasons a session can end (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Completed,
    Silence,
    Timeout,
    Cancelled,
    Disconnect,
    Error,
}

/// Frames sent by the server to an edge device.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    State {
        state: String,
    },
    Transcription {
        session_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker_alias: Option<String>,
    },
    Stream {
        session_id: String,
        content: String,
    },
    ResponseText {
        session_id: String,
        text: String,
        is_final: bool,
    },
    Action {
        session_id: String,
        intent: String,
        success: bool,
    },
    TtsAudio {
        session_id: String,
        /// base64-encoded WAV.
        audio: String,
        is_final: bool,
    },
    SessionEnd {
        session_id: String,
        reason: SessionEndReason,
    },
    Notification {
        notification_id: String,
        title: String,
        message: String,
        urgency: String,
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        tts_handled: bool,
        created_at: chrono::DateTime<chrono::Utc>,
    },
    ConfigUpdate {
        config: serde_json::Value,
        config_version: u64,
    },
    ServerShutdown {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\"}".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register_frame() {
        let raw = r#"{"type":"register","device_id":"d1","device_type":"satellite","room":"Kitchen","capabilities":{}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        matches!(frame, ClientFrame::Register { .. });
    }

    #[test]
    fn parses_audio_frame() {
        let raw = r#"{"type":"audio","session_id":"s1","audio":"AAAA","sequence":3}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::Audio { session_id, sequence, .. } => {
                assert_eq!(session_id, "s1");
                assert_eq!(sequence, 3);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn serializes_session_end_with_snake_case_reason() {
        let frame = ServerFrame::SessionEnd {
            session_id: "s1".to_owned(),
            reason: SessionEndReason::Disconnect,
        };
        let text = frame.to_text();
        assert!(text.contains("\"reason\":\"disconnect\""));
    }
}
