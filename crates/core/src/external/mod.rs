// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Contracts for everything outside this process's own state: the home
//! automation bridge, LLM/STT/TTS/speaker-ID backends, and notification
//! persistence. Each is a narrow `async_trait` so the rest of the crate
//! depends on behavior, not on a specific HTTP client.

pub mod bridge;
pub mod llm;
pub mod persistence;
pub mod speaker;
pub mod stt;
pub mod tts;
pub mod tts_cache;

pub use bridge::{BridgeClient, BridgeEntityState};
pub use persistence::PersistenceStore;
