// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Manager (C2) — owns per-utterance voice sessions: audio
//! buffering, state transitions, timeouts. Co-located with the Device
//! Registry (C1, [`crate::devices`]); operations here acquire the same
//! [`crate::devices::Registry`] lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::devices::{DeviceState, Registry, RegistryInner};
use crate::transport::ws_msg::{ServerFrame, SessionEndReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Listening,
    Processing,
    Speaking,
    Ended,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Ended => "ended",
        }
    }
}

/// A single utterance's lifecycle: created on wake-word/manual trigger,
/// destroyed on completion, timeout, or device disconnect.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub device_id: String,
    pub room_id: Option<String>,
    pub state: SessionState,
    pub audio_chunks: Vec<Vec<u8>>,
    pub audio_len: usize,
    pub audio_sequence: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub max_duration_secs: u64,
    pub transcription: Option<String>,
    pub response_text: Option<String>,
    pub speaker_name: Option<String>,
    pub speaker_alias: Option<String>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let max = chrono::Duration::seconds(self.max_duration_secs as i64);
        now - self.started_at > max
    }
}

/// Outcome of `buffer_audio`: either ok, or a tagged rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAudioError {
    UnknownSession,
    ChunkTooLarge,
    BufferCapacityExceeded,
}

impl Registry {
    /// `start_session(device_id, trigger_info, preassigned_id?)` (spec §4.2).
    ///
    /// Returns `None` if the device is unknown, or if the device already has
    /// a session (first-trigger-wins). On success the device transitions to
    /// *listening* and a session record is inserted.
    pub async fn start_session(
        &self,
        device_id: &str,
        preassigned_id: Option<String>,
    ) -> Option<String> {
        let mut inner = self.inner.write().await;
        let record = inner.devices.get(device_id)?;
        if record.device.current_session_id.is_some() {
            return None;
        }
        let room_id = record.device.room_id.clone();
        let max_duration = self.config.session_max_duration_secs;

        let session_id = preassigned_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = Session {
            session_id: session_id.clone(),
            device_id: device_id.to_owned(),
            room_id,
            state: SessionState::Listening,
            audio_chunks: Vec::new(),
            audio_len: 0,
            audio_sequence: None,
            started_at: Utc::now(),
            max_duration_secs: max_duration,
            transcription: None,
            response_text: None,
            speaker_name: None,
            speaker_alias: None,
        };

        let record = inner.devices.get_mut(device_id)?;
        record.device.current_session_id = Some(session_id.clone());
        record.device.state = DeviceState::Listening;
        let _ = record.channel.send(ServerFrame::State { state: DeviceState::Listening.as_str().to_owned() });

        inner.sessions.insert(session_id.clone(), session);
        Some(session_id)
    }

    /// `buffer_audio(session_id, chunk_bytes, sequence)` (spec §4.2).
    pub async fn buffer_audio(
        &self,
        session_id: &str,
        chunk: Vec<u8>,
        sequence: u64,
    ) -> Result<(), BufferAudioError> {
        if chunk.len() > self.config.ws_max_message_size {
            return Err(BufferAudioError::ChunkTooLarge);
        }
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(session_id).ok_or(BufferAudioError::UnknownSession)?;
        if session.audio_len + chunk.len() > self.config.ws_max_audio_buffer_size {
            return Err(BufferAudioError::BufferCapacityExceeded);
        }
        session.audio_len += chunk.len();
        session.audio_chunks.push(chunk);
        session.audio_sequence = Some(sequence);
        Ok(())
    }

    /// `get_audio_buffer(session_id)` (spec §4.2): concatenated bytes or `None`.
    pub async fn get_audio_buffer(&self, session_id: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(session_id)?;
        let mut buf = Vec::with_capacity(session.audio_len);
        for chunk in &session.audio_chunks {
            buf.extend_from_slice(chunk);
        }
        Some(buf)
    }

    /// `set_session_state(session_id, new_state)` (spec §4.2): mirrors state
    /// onto the owning device and pushes a `{type:"state"}` frame (errors
    /// swallowed — the channel write is best-effort).
    pub async fn set_session_state(&self, session_id: &str, new_state: SessionState) {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(session_id) else { return };
        session.state = new_state;
        let device_id = session.device_id.clone();
        let device_state = match new_state {
            SessionState::Listening => DeviceState::Listening,
            SessionState::Processing => DeviceState::Processing,
            SessionState::Speaking => DeviceState::Speaking,
            SessionState::Ended => DeviceState::Idle,
        };
        if let Some(record) = inner.devices.get_mut(&device_id) {
            record.device.state = device_state;
            let _ = record
                .channel
                .send(ServerFrame::State { state: device_state.as_str().to_owned() });
        }
    }

    pub async fn send_transcription(
        &self,
        session_id: &str,
        text: String,
        speaker_name: Option<String>,
        speaker_alias: Option<String>,
    ) {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(session_id) else { return };
        session.transcription = Some(text.clone());
        session.speaker_name = speaker_name.clone();
        session.speaker_alias = speaker_alias.clone();
        let device_id = session.device_id.clone();
        if let Some(record) = inner.devices.get(&device_id) {
            let _ = record.channel.send(ServerFrame::Transcription {
                session_id: session_id.to_owned(),
                text,
                speaker_name,
                speaker_alias,
            });
        }
    }

    pub async fn send_action_result(&self, session_id: &str, intent: String, success: bool) {
        self.send_to_session_device(
            session_id,
            ServerFrame::Action { session_id: session_id.to_owned(), intent, success },
        )
        .await;
    }

    pub async fn send_stream_chunk(&self, session_id: &str, content: String) {
        self.send_to_session_device(
            session_id,
            ServerFrame::Stream { session_id: session_id.to_owned(), content },
        )
        .await;
    }

    pub async fn send_response_text(&self, session_id: &str, text: String, is_final: bool) {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(session_id) else { return };
        session.response_text = Some(text.clone());
        let device_id = session.device_id.clone();
        if let Some(record) = inner.devices.get(&device_id) {
            let _ = record.channel.send(ServerFrame::ResponseText {
                session_id: session_id.to_owned(),
                text,
                is_final,
            });
        }
    }

    /// `send_tts_audio(session_id, payload)` (spec §4.2): checks the speaker
    /// capability and suppresses silently otherwise; transitions the session
    /// to *speaking* on first emission.
    pub async fn send_tts_audio(&self, session_id: &str, audio_base64: String, is_final: bool) {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get(session_id) else { return };
        let device_id = session.device_id.clone();
        let first_emission = session.state != SessionState::Speaking;

        let Some(record) = inner.devices.get(&device_id) else { return };
        if !record.device.capabilities.has_speaker() {
            return;
        }
        let _ = record.channel.send(ServerFrame::TtsAudio {
            session_id: session_id.to_owned(),
            audio: audio_base64,
            is_final,
        });

        if first_emission {
            if let Some(session) = inner.sessions.get_mut(session_id) {
                session.state = SessionState::Speaking;
            }
            if let Some(record) = inner.devices.get_mut(&device_id) {
                record.device.state = DeviceState::Speaking;
                let _ = record.channel.send(ServerFrame::State {
                    state: DeviceState::Speaking.as_str().to_owned(),
                });
            }
        }
    }

    /// `end_session(session_id, reason)` (spec §4.2): releases the device
    /// (state -> idle, `current_session_id` -> `None`), removes the session,
    /// notifies the device with `session_end` then `state:"idle"`.
    pub async fn end_session(&self, session_id: &str, reason: SessionEndReason) {
        let mut inner = self.inner.write().await;
        Registry::end_session_locked(&mut inner, session_id, reason);
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        inner.sessions.get(session_id).cloned()
    }

    async fn send_to_session_device(&self, session_id: &str, frame: ServerFrame) {
        let inner = self.inner.read().await;
        let Some(session) = inner.sessions.get(session_id) else { return };
        if let Some(record) = inner.devices.get(&session.device_id) {
            let _ = record.channel.send(frame);
        }
    }
}

/// Helper for tests/handlers that need to reach into the registry for a
/// device's current session without going through the public API surface.
pub(crate) fn owning_device_id(inner: &RegistryInner, session_id: &str) -> Option<String> {
    inner.sessions.get(session_id).map(|s| s.device_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenfieldConfig;
    use crate::devices::{DeviceMetadata, DeviceType};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_config() -> RenfieldConfig {
        use clap::Parser;
        #[derive(clap::Parser)]
        struct Harness {
            #[command(flatten)]
            cfg: RenfieldConfig,
        }
        Harness::parse_from(["renfield"]).cfg
    }

    async fn registered_registry(device_id: &str) -> (Registry, mpsc::UnboundedReceiver<ServerFrame>) {
        let registry = Registry::new(Arc::new(test_config()));
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .register(
                device_id.to_owned(),
                DeviceType::Satellite,
                "Kitchen".into(),
                DeviceType::Satellite.default_capabilities(),
                DeviceMetadata::default(),
                true,
                tx,
            )
            .await;
        (registry, rx)
    }

    #[tokio::test]
    async fn first_trigger_wins() {
        let (registry, _rx) = registered_registry("d1").await;
        let first = registry.start_session("d1", None).await;
        assert!(first.is_some());
        let second = registry.start_session("d1", None).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn buffer_audio_rejects_oversized_chunk() {
        let (registry, _rx) = registered_registry("d1").await;
        let session_id = registry.start_session("d1", None).await.unwrap();
        let big = vec![0u8; registry.config.ws_max_message_size + 1];
        let result = registry.buffer_audio(&session_id, big, 1).await;
        assert_eq!(result, Err(BufferAudioError::ChunkTooLarge));
    }

    #[tokio::test]
    async fn buffer_audio_rejects_beyond_cap_and_leaves_buffer_unchanged() {
        let (registry, _rx) = registered_registry("d1").await;
        let session_id = registry.start_session("d1", None).await.unwrap();
        let cap = registry.config.ws_max_audio_buffer_size;
        let chunk = vec![0u8; cap];
        registry.buffer_audio(&session_id, chunk, 1).await.unwrap();
        let before = registry.get_audio_buffer(&session_id).await.unwrap().len();
        let result = registry.buffer_audio(&session_id, vec![1, 2, 3], 2).await;
        assert_eq!(result, Err(BufferAudioError::BufferCapacityExceeded));
        let after = registry.get_audio_buffer(&session_id).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn end_session_releases_device() {
        let (registry, _rx) = registered_registry("d1").await;
        let session_id = registry.start_session("d1", None).await.unwrap();
        registry.end_session(&session_id, SessionEndReason::Completed).await;
        let device = registry.get_device("d1").await.unwrap();
        assert!(device.current_session_id.is_none());
        assert_eq!(device.state, DeviceState::Idle);
        assert!(registry.get_session(&session_id).await.is_none());
    }

    #[tokio::test]
    async fn tts_audio_suppressed_without_speaker_capability() {
        let registry = Registry::new(Arc::new(test_config()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut caps = DeviceType::Satellite.default_capabilities();
        caps.speaker = false;
        registry
            .register("d1".into(), DeviceType::Satellite, "Kitchen".into(), caps, DeviceMetadata::default(), true, tx)
            .await;
        let session_id = registry.start_session("d1", None).await.unwrap();
        let _ = rx.try_recv(); // drain the "listening" state frame
        registry.send_tts_audio(&session_id, "AAAA".into(), true).await;
        assert!(rx.try_recv().is_err());
    }

    proptest::proptest! {
        /// Replaying an arbitrary sequence of chunk appends, the buffer's
        /// length never exceeds the configured cap, and any append that
        /// would cross it is rejected while leaving the buffer unchanged
        /// (spec §8).
        #[test]
        fn buffer_audio_never_exceeds_cap(chunk_sizes in proptest::collection::vec(0usize..4096, 0..20)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (registry, _rx) = registered_registry("d1").await;
                let session_id = registry.start_session("d1", None).await.unwrap();
                let cap = registry.config.ws_max_audio_buffer_size;
                let mut expected_len = 0usize;

                for (i, size) in chunk_sizes.iter().enumerate() {
                    let chunk = vec![0u8; *size];
                    let result = registry.buffer_audio(&session_id, chunk, i as u64).await;
                    if expected_len + size > cap {
                        proptest::prop_assert_eq!(result, Err(BufferAudioError::BufferCapacityExceeded));
                    } else {
                        proptest::prop_assert!(result.is_ok());
                        expected_len += size;
                    }
                    let actual = registry.get_audio_buffer(&session_id).await.unwrap().len();
                    proptest::prop_assert_eq!(actual, expected_len);
                    proptest::prop_assert!(actual <= cap);
                }
                Ok(())
            })?;
        }
    }
}
