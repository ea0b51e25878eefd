// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device WebSocket endpoint (spec §6): one connection per edge device,
//! carrying both the control protocol (register/heartbeat/config) and the
//! audio pipeline (wakeword/audio/audio_end) in a single bidirectional
//! stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::devices::{Capabilities, DeviceMetadata, DeviceType};
use crate::error::RenfieldError;
use crate::external::llm::{ChatMessage, ChatOptions, ChatRole};
use crate::presence::BleReportDevice;
use crate::session::{BufferAudioError, SessionState};
use crate::state::AppState;
use crate::transport::auth;
use crate::transport::ws_msg::{BleSighting, ButtonAction, ClientFrame, ServerFrame, SessionEndReason};

#[derive(Debug, Deserialize)]
pub struct DeviceWsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Upgrade handler for `/devices/ws`. Auth is done here via query param
/// rather than the `Authorization` header since browsers' native WebSocket
/// API cannot set custom headers; `transport::auth::auth_layer` already
/// bypasses this path for that reason.
pub async fn device_ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let expected = state.config.auth_enabled.then_some(state.config.secret_key.as_str());
    let query_string = query.token.map(|t| format!("token={t}")).unwrap_or_default();
    if let Err(e) = auth::validate_ws_query(&query_string, expected) {
        return e.to_http_response("unauthorized").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state)).into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut device_id: Option<String> = None;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(frame) = outbound else { break };
                if ws_tx.send(Message::Text(frame.to_text().into())).await.is_err() {
                    break;
                }
            }
            inbound = ws_rx.next() => {
                let Some(inbound) = inbound else { break };
                let Ok(message) = inbound else { break };
                let Message::Text(text) = message else { continue };

                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(err = %e, "dropping malformed client frame");
                        let _ = tx.send(ServerFrame::Error { message: "malformed frame".to_owned() });
                        continue;
                    }
                };

                handle_frame(&state, &mut device_id, &tx, frame).await;
            }
        }
    }

    if let Some(device_id) = device_id {
        info!(%device_id, "device disconnected");
        state.registry.unregister(&device_id).await;
        state.wakeword.unsubscribe(&device_id).await;
    }
}

async fn handle_frame(
    state: &Arc<AppState>,
    device_id: &mut Option<String>,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Register { device_id: id, device_type, room, capabilities, is_stationary, .. } => {
            let device_type = DeviceType::from_str_loose(&device_type);
            let capabilities = Capabilities::from_json(&capabilities, device_type);
            state
                .registry
                .register(
                    id.clone(),
                    device_type,
                    room,
                    capabilities,
                    DeviceMetadata::default(),
                    is_stationary.unwrap_or(false),
                    tx.clone(),
                )
                .await;
            state
                .wakeword
                .subscribe(id.clone(), Some(id.clone()), Some(device_type_str(device_type).to_owned()), tx.clone())
                .await;
            info!(device_id = %id, "device registered");
            *device_id = Some(id);
        }

        ClientFrame::Heartbeat { metrics, .. } => {
            let Some(id) = device_id.as_deref() else { return };
            state.registry.update_heartbeat(id, metrics.as_ref()).await;
        }

        ClientFrame::Wakeword { keyword, confidence, session_id } => {
            let Some(id) = device_id.as_deref() else { return };
            debug!(device_id = %id, keyword, confidence, "wake word triggered");
            if state.registry.start_session(id, session_id).await.is_none() {
                let _ = tx.send(ServerFrame::Error { message: "session already active".to_owned() });
            }
        }

        ClientFrame::Audio { session_id, audio, sequence } => {
            let chunk = match base64::engine::general_purpose::STANDARD.decode(&audio) {
                Ok(chunk) => chunk,
                Err(_) => {
                    let _ = tx.send(ServerFrame::Error { message: "invalid base64 audio".to_owned() });
                    return;
                }
            };
            if let Err(e) = state.registry.buffer_audio(&session_id, chunk, sequence).await {
                let message = match e {
                    BufferAudioError::UnknownSession => "unknown session",
                    BufferAudioError::ChunkTooLarge => "audio chunk too large",
                    BufferAudioError::BufferCapacityExceeded => "audio buffer capacity exceeded",
                };
                let _ = tx.send(ServerFrame::Error { message: message.to_owned() });
            }
        }

        ClientFrame::AudioEnd { session_id } => {
            run_turn(state, &session_id).await;
        }

        ClientFrame::Button { action } => {
            let Some(id) = device_id.as_deref() else { return };
            if action == ButtonAction::Press && state.registry.start_session(id, None).await.is_none() {
                let _ = tx.send(ServerFrame::Error { message: "session already active".to_owned() });
            }
        }

        ClientFrame::BleReport { room_id, devices, room_name } => {
            let Some(id) = device_id.as_deref() else { return };
            let sightings: Vec<BleReportDevice> =
                devices.into_iter().map(|BleSighting { mac, rssi }| BleReportDevice { mac, rssi }).collect();
            state.presence.process_ble_report(id, room_id.as_deref(), &sightings, room_name.as_deref()).await;
        }

        ClientFrame::ConfigAck { success, active_keywords, failed_keywords, error, .. } => {
            let Some(id) = device_id.as_deref() else { return };
            state.wakeword.handle_config_ack(id, success, active_keywords, failed_keywords, error).await;
        }
    }
}

fn device_type_str(device_type: DeviceType) -> &'static str {
    match device_type {
        DeviceType::Satellite => "satellite",
        DeviceType::WebPanel => "web_panel",
        DeviceType::WebTablet => "web_tablet",
        DeviceType::WebBrowser => "web_browser",
        DeviceType::WebKiosk => "web_kiosk",
    }
}

/// Runs one full voice turn once a device signals `audio_end` (spec §6): STT
/// transcription, a chat completion guarded by the chat breaker, and TTS
/// synthesis, with the session's outbound frames as the only externally
/// visible effect of each step.
///
/// Speaker identification is not wired in here: there is no enrolled-speaker
/// store yet to match an extracted embedding against, so transcriptions go
/// out with `speaker_name`/`speaker_alias` left `None` until one exists.
async fn run_turn(state: &Arc<AppState>, session_id: &str) {
    let Some(audio) = state.registry.get_audio_buffer(session_id).await else {
        warn!(session_id, "audio_end for unknown session");
        return;
    };

    state.registry.set_session_state(session_id, SessionState::Processing).await;

    let text = match state.stt.transcribe(&audio, None).await {
        Ok(text) => text,
        Err(e) => {
            warn!(session_id, err = %e, "transcription failed");
            state.registry.end_session(session_id, SessionEndReason::Error).await;
            return;
        }
    };
    state.registry.send_transcription(session_id, text.clone(), None, None).await;

    let messages = [ChatMessage { role: ChatRole::User, content: text }];
    let response_text = run_chat_with_fallback(state, session_id, &messages).await;
    state.registry.send_response_text(session_id, response_text.clone(), true).await;

    match state.tts.synthesize(&response_text, None).await {
        Ok(audio) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&audio);
            state.registry.send_tts_audio(session_id, encoded, true).await;
        }
        Err(e) => {
            warn!(session_id, err = %e, "tts synthesis failed");
        }
    }

    state.registry.end_session(session_id, SessionEndReason::Completed).await;
}

/// Chat completion with the spec §7 failure-propagation policy: a breaker-
/// open or upstream failure on the full chat call falls through to a
/// summarizer pass (a single-shot `generate` over the raw transcription,
/// cheaper than resending full chat context); if that also fails, an
/// apology carrying the originating reason tag is returned so the turn still
/// produces a defined, speakable result instead of aborting the session.
async fn run_chat_with_fallback(state: &Arc<AppState>, session_id: &str, messages: &[ChatMessage]) -> String {
    let model = &state.config.briefing_model;
    match guarded_chat(&state.chat_breaker, state.llm.as_ref(), model, messages).await {
        Ok(text) => return text,
        Err(reason) => {
            warn!(session_id, %reason, "chat completion failed, falling through to summarizer pass");
        }
    }

    let Some(last_user_text) = messages.iter().rev().find(|m| m.role == ChatRole::User) else {
        return apology(RenfieldError::Internal);
    };
    let summary_prompt = format!("Reply with one brief sentence acknowledging: {}", last_user_text.content);

    match guarded_generate(&state.chat_breaker, state.llm.as_ref(), model, &summary_prompt).await {
        Ok(text) => text,
        Err(reason) => {
            warn!(session_id, %reason, "summarizer pass also failed, returning apology");
            apology(reason)
        }
    }
}

async fn guarded_chat(
    breaker: &crate::breaker::CircuitBreaker,
    llm: &dyn crate::external::llm::LlmClient,
    model: &str,
    messages: &[ChatMessage],
) -> Result<String, RenfieldError> {
    breaker.allow_request().await?;
    match llm.chat(model, messages, &ChatOptions::default()).await {
        Ok(text) => {
            breaker.record_success().await;
            Ok(text)
        }
        Err(e) => {
            breaker.record_failure().await;
            debug!(err = %e, "chat call failed");
            Err(RenfieldError::Upstream)
        }
    }
}

async fn guarded_generate(
    breaker: &crate::breaker::CircuitBreaker,
    llm: &dyn crate::external::llm::LlmClient,
    model: &str,
    prompt: &str,
) -> Result<String, RenfieldError> {
    breaker.allow_request().await?;
    match llm.generate(model, prompt, &ChatOptions::default()).await {
        Ok(text) => {
            breaker.record_success().await;
            Ok(text)
        }
        Err(e) => {
            breaker.record_failure().await;
            debug!(err = %e, "summarizer call failed");
            Err(RenfieldError::Upstream)
        }
    }
}

fn apology(reason: RenfieldError) -> String {
    format!("I'm sorry, I couldn't process that just now. [reason:{}]", reason.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreaker;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn device_type_str_round_trips_through_from_str_loose() {
        for dt in [
            DeviceType::Satellite,
            DeviceType::WebPanel,
            DeviceType::WebTablet,
            DeviceType::WebBrowser,
            DeviceType::WebKiosk,
        ] {
            assert_eq!(DeviceType::from_str_loose(device_type_str(dt)), dt);
        }
    }

    struct ScriptedLlm {
        chat_calls: AtomicU32,
        generate_calls: AtomicU32,
        chat_ok: bool,
        generate_ok: bool,
    }

    #[async_trait::async_trait]
    impl crate::external::llm::LlmClient for ScriptedLlm {
        async fn chat(&self, _model: &str, _messages: &[ChatMessage], _options: &ChatOptions) -> anyhow::Result<String> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            if self.chat_ok { Ok("chat reply".to_owned()) } else { Err(anyhow::anyhow!("upstream down")) }
        }
        async fn generate(&self, _model: &str, _prompt: &str, _options: &ChatOptions) -> anyhow::Result<String> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            if self.generate_ok { Ok("summary reply".to_owned()) } else { Err(anyhow::anyhow!("upstream down")) }
        }
        async fn embeddings(&self, _model: &str, _prompt: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn fallback_not_used_when_chat_succeeds() {
        let breaker = CircuitBreaker::new("chat", 3, Duration::from_secs(30), 1);
        let llm = ScriptedLlm { chat_calls: AtomicU32::new(0), generate_calls: AtomicU32::new(0), chat_ok: true, generate_ok: true };
        let messages = [ChatMessage { role: ChatRole::User, content: "hello".to_owned() }];
        let reply = guarded_chat(&breaker, &llm, "model", &messages).await.unwrap();
        assert_eq!(reply, "chat reply");
        assert_eq!(llm.generate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn summarizer_pass_used_when_chat_fails() {
        let breaker = CircuitBreaker::new("chat", 3, Duration::from_secs(30), 1);
        let llm = ScriptedLlm { chat_calls: AtomicU32::new(0), generate_calls: AtomicU32::new(0), chat_ok: false, generate_ok: true };
        assert!(guarded_chat(&breaker, &llm, "model", &[]).await.is_err());
        let reply = guarded_generate(&breaker, &llm, "model", "prompt").await.unwrap();
        assert_eq!(reply, "summary reply");
    }

    #[test]
    fn apology_embeds_the_reason_tag() {
        let text = apology(RenfieldError::CircuitOpen);
        assert!(text.contains("[reason:CIRCUIT_OPEN]"));
    }
}
