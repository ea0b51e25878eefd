// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state: one instance of every component, constructed
//! once in [`crate::run`] and handed to the transport layer via axum's
//! `with_state`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::config::RenfieldConfig;
use crate::devices::Registry;
use crate::external::bridge::BridgeClient;
use crate::external::llm::LlmClient;
use crate::external::persistence::PersistenceStore;
use crate::external::speaker::SpeakerIdClient;
use crate::external::stt::SttClient;
use crate::external::tts::TtsClient;
use crate::external::tts_cache::TtsCache;
use crate::notifications::NotificationPipeline;
use crate::output_router::OutputRouter;
use crate::presence::PresenceTracker;
use crate::reminders::ReminderService;
use crate::scheduler::Scheduler;
use crate::wakeword::WakeWordFabric;

/// Everything a request handler or background loop needs. Cheap to clone
/// (every field is an `Arc`); held behind one more `Arc` by axum.
pub struct AppState {
    pub config: Arc<RenfieldConfig>,
    pub shutdown: CancellationToken,

    pub registry: Arc<Registry>,
    pub wakeword: Arc<WakeWordFabric>,
    pub presence: Arc<PresenceTracker>,
    pub router: Arc<OutputRouter>,
    pub notifications: Arc<NotificationPipeline>,
    pub reminders: Arc<ReminderService>,
    pub scheduler: Arc<Scheduler>,

    pub store: Arc<dyn PersistenceStore>,
    pub llm: Arc<dyn LlmClient>,
    pub stt: Arc<dyn SttClient>,
    pub tts: Arc<dyn TtsClient>,
    pub speaker: Arc<dyn SpeakerIdClient>,
    pub bridge: Arc<dyn BridgeClient>,
    pub tts_cache: Arc<TtsCache>,

    /// Guards the conversational chat LLM call made from the agent loop's
    /// per-step reasoning (spec §4.8).
    pub chat_breaker: Arc<CircuitBreaker>,
    /// Guards the scheduler's briefing-generation LLM call, a separate site
    /// from `chat_breaker` since the two fail independently.
    pub briefing_breaker: Arc<CircuitBreaker>,
}
