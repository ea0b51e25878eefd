// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Renfield: a self-hosted coordination fabric for a fleet of voice-assistant
//! edge devices — device registry, session manager, wake-word config fabric,
//! presence tracker, output router, notification pipeline, reminders and
//! scheduler, circuit breakers, and the external-service contracts that back
//! them (spec sections 1-9).

pub mod breaker;
pub mod config;
pub mod devices;
pub mod error;
pub mod external;
pub mod notifications;
pub mod output_router;
pub mod presence;
pub mod reminders;
pub mod room;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod transport;
pub mod wakeword;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::config::RenfieldConfig;
use crate::devices::Registry;
use crate::external::bridge::HomeBridge;
use crate::external::llm::HttpLlmClient;
use crate::external::persistence::InMemoryStore;
use crate::external::speaker::HttpSpeakerIdClient;
use crate::external::stt::HttpSttClient;
use crate::external::tts::HttpTtsClient;
use crate::external::tts_cache::TtsCache;
use crate::notifications::NotificationPipeline;
use crate::output_router::OutputRouter;
use crate::presence::PresenceTracker;
use crate::reminders::ReminderService;
use crate::scheduler::Scheduler;
use crate::state::AppState;
use crate::transport::build_router;
use crate::wakeword::WakeWordFabric;

pub const WEBHOOK_TOKEN_SETTING_KEY: &str = "webhook_token";

/// Run the coordination core until shutdown.
pub async fn run(config: RenfieldConfig) -> anyhow::Result<()> {
    config.validate_startup().map_err(|e| anyhow::anyhow!(e))?;

    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let config = Arc::new(config);

    let store: Arc<dyn crate::external::persistence::PersistenceStore> = InMemoryStore::new();

    if let Some(token) = &config.webhook_token {
        if store.get_setting(WEBHOOK_TOKEN_SETTING_KEY).await?.is_none() {
            store
                .put_setting(WEBHOOK_TOKEN_SETTING_KEY, serde_json::Value::String(token.clone()))
                .await?;
        }
    }

    let registry = Arc::new(Registry::new(Arc::clone(&config)));
    let wakeword = Arc::new(WakeWordFabric::new(&config));
    let presence = Arc::new(PresenceTracker::new(&config));

    let bridge: Arc<dyn crate::external::bridge::BridgeClient> =
        Arc::new(HomeBridge::new(config.bridge_base_url.clone(), config.bridge_auth_token.clone()));
    let llm: Arc<dyn crate::external::llm::LlmClient> =
        Arc::new(HttpLlmClient::new(config.llm_base_url.clone(), config.llm_api_key.clone()));
    let stt: Arc<dyn crate::external::stt::SttClient> =
        Arc::new(HttpSttClient::new(config.stt_base_url.clone(), config.stt_api_key.clone()));
    let tts: Arc<dyn crate::external::tts::TtsClient> =
        Arc::new(HttpTtsClient::new(config.tts_base_url.clone(), config.tts_api_key.clone()));
    let speaker: Arc<dyn crate::external::speaker::SpeakerIdClient> =
        Arc::new(HttpSpeakerIdClient::new(config.speaker_base_url.clone(), config.speaker_api_key.clone()));
    let tts_cache = Arc::new(TtsCache::new(&config)?);

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

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        shutdown: shutdown.clone(),
        registry: Arc::clone(&registry),
        wakeword,
        presence,
        router,
        notifications: Arc::clone(&notifications),
        reminders: Arc::clone(&reminders),
        scheduler: Arc::clone(&scheduler),
        store,
        llm,
        stt,
        tts,
        speaker,
        bridge,
        tts_cache: Arc::clone(&tts_cache),
        chat_breaker,
        briefing_breaker,
    });

    devices::spawn_reaper(Arc::clone(&registry), shutdown.clone());
    notifications::spawn_expiry_sweeper(Arc::clone(&notifications), config.notify_sweep_interval(), shutdown.clone());
    reminders::spawn_ticker(Arc::clone(&reminders), config.reminder_tick_interval(), shutdown.clone());
    scheduler::spawn_loop(Arc::clone(&scheduler), config.scheduler_tick_interval(), shutdown.clone());
    crate::external::tts_cache::spawn_sweeper(tts_cache, config.notify_sweep_interval(), shutdown.clone());

    tracing::info!(%addr, "renfield coordination core listening");
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
