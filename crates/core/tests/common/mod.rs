// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for crate-level integration tests: builds a full
//! [`AppState`] the way [`renfield_core::run`] does, swapping the HTTP-backed
//! external adapters for in-memory fakes so tests never touch the network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use renfield_core::breaker::CircuitBreaker;
use renfield_core::config::RenfieldConfig;
use renfield_core::devices::Registry;
use renfield_core::external::bridge::{BridgeClient, BridgeEntityState};
use renfield_core::external::llm::{ChatMessage, ChatOptions, LlmClient};
use renfield_core::external::persistence::InMemoryStore;
use renfield_core::external::speaker::{EnrolledSpeaker, HttpSpeakerIdClient, SpeakerIdClient, SpeakerMatch};
use renfield_core::external::stt::{HttpSttClient, SttClient};
use renfield_core::external::tts::TtsClient;
use renfield_core::external::tts_cache::TtsCache;
use renfield_core::notifications::NotificationPipeline;
use renfield_core::output_router::OutputRouter;
use renfield_core::presence::PresenceTracker;
use renfield_core::reminders::ReminderService;
use renfield_core::scheduler::Scheduler;
use renfield_core::state::AppState;
use renfield_core::wakeword::WakeWordFabric;

#[derive(clap::Parser)]
struct Harness {
    #[command(flatten)]
    cfg: RenfieldConfig,
}

pub fn test_config() -> RenfieldConfig {
    let mut cfg = Harness::parse_from(["renfield"]).cfg;
    cfg.tts_cache_dir = std::env::temp_dir().join(format!("renfield-test-cache-{}", uuid::Uuid::new_v4()));
    cfg
}

/// Echoes the input text back as bytes — good enough to exercise the
/// synthesize -> encode -> deliver path without a real TTS backend.
#[derive(Default)]
pub struct FakeTts;

#[async_trait]
impl TtsClient for FakeTts {
    async fn synthesize(&self, text: &str, _language: Option<&str>) -> anyhow::Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

/// In-memory bridge double: fixed entity states, volume calls recorded.
#[derive(Default)]
pub struct FakeBridge {
    pub states: Mutex<HashMap<String, BridgeEntityState>>,
    pub volume_calls: Mutex<Vec<(String, f32)>>,
}

impl FakeBridge {
    pub fn with_state(entity_id: &str, state: BridgeEntityState) -> Self {
        let fake = Self::default();
        fake.states.lock().unwrap().insert(entity_id.to_owned(), state);
        fake
    }
}

#[async_trait]
impl BridgeClient for FakeBridge {
    async fn get_entity_state(&self, entity_id: &str) -> anyhow::Result<BridgeEntityState> {
        Ok(self.states.lock().unwrap().get(entity_id).copied().unwrap_or(BridgeEntityState::Unknown))
    }

    async fn get_volume(&self, _entity_id: &str) -> anyhow::Result<f32> {
        Ok(1.0)
    }

    async fn set_volume(&self, entity_id: &str, volume: f32) -> anyhow::Result<()> {
        self.volume_calls.lock().unwrap().push((entity_id.to_owned(), volume));
        Ok(())
    }

    async fn play_audio(&self, _entity_id: &str, _audio_url: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Replies with a canned greeting; only exercised by the scheduler's
/// briefing job type in these tests, never by the agent turn itself.
pub struct FakeLlm;

#[async_trait]
impl LlmClient for FakeLlm {
    async fn chat(&self, _model: &str, _messages: &[ChatMessage], _options: &ChatOptions) -> anyhow::Result<String> {
        Ok("Good morning. Nothing notable today.".to_owned())
    }
    async fn generate(&self, _model: &str, _prompt: &str, _options: &ChatOptions) -> anyhow::Result<String> {
        Ok("ok".to_owned())
    }
    async fn embeddings(&self, _model: &str, _prompt: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.0; 8])
    }
}

/// Builds a fully wired [`AppState`] (mirrors `renfield_core::run`'s
/// construction order) with fake TTS/bridge/LLM adapters and the in-memory
/// persistence store, so integration tests exercise real cross-component
/// wiring without any outbound network call.
pub async fn test_state_with_config(config: RenfieldConfig) -> Arc<AppState> {
    let config = Arc::new(config);
    let store: Arc<dyn renfield_core::external::persistence::PersistenceStore> = InMemoryStore::new();

    let registry = Arc::new(Registry::new(Arc::clone(&config)));
    let wakeword = Arc::new(WakeWordFabric::new(&config));
    let presence = Arc::new(PresenceTracker::new(&config));

    let bridge: Arc<dyn BridgeClient> = Arc::new(FakeBridge::default());
    let llm: Arc<dyn LlmClient> = Arc::new(FakeLlm);
    let stt: Arc<dyn SttClient> = Arc::new(HttpSttClient::new("http://127.0.0.1:0".to_owned(), None));
    let tts: Arc<dyn TtsClient> = Arc::new(FakeTts);
    let speaker: Arc<dyn SpeakerIdClient> = Arc::new(HttpSpeakerIdClient::new("http://127.0.0.1:0".to_owned(), None));
    let tts_cache = Arc::new(TtsCache::new(&config).expect("tts cache dir"));

    let router = Arc::new(OutputRouter::new(&config, Arc::clone(&registry), Arc::clone(&store), Arc::clone(&bridge)));
    let notifications = Arc::new(NotificationPipeline::new(
        &config,
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&presence),
        Arc::clone(&router),
        Arc::clone(&tts),
        Arc::clone(&bridge),
        Arc::clone(&tts_cache),
    ));
    let reminders = Arc::new(ReminderService::new(Arc::clone(&store), Arc::clone(&notifications)));

    let chat_breaker = Arc::new(CircuitBreaker::new(
        "chat",
        config.breaker_failure_threshold,
        config.breaker_recovery_timeout(),
        config.breaker_half_open_max_calls,
    ));
    let briefing_breaker = Arc::new(CircuitBreaker::new(
        "briefing",
        config.breaker_failure_threshold,
        config.breaker_recovery_timeout(),
        config.breaker_half_open_max_calls,
    ));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&notifications),
        Arc::clone(&llm),
        Arc::clone(&briefing_breaker),
        config.briefing_model.clone(),
        config.briefing_language.clone(),
    ));

    Arc::new(AppState {
        config,
        shutdown: CancellationToken::new(),
        registry,
        wakeword,
        presence,
        router,
        notifications,
        reminders,
        scheduler,
        store,
        llm,
        stt,
        tts,
        speaker,
        bridge,
        tts_cache,
        chat_breaker,
        briefing_breaker,
    })
}

pub async fn test_state() -> Arc<AppState> {
    test_state_with_config(test_config()).await
}

/// Silences the unused-import warning on `EnrolledSpeaker`/`SpeakerMatch`
/// for test files that only need `SpeakerIdClient` wired, not exercised.
pub fn _touch_speaker_types(_e: Option<EnrolledSpeaker>, _m: Option<SpeakerMatch>) {}
