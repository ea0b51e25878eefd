// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit Breaker + Budget Guards (C8) — protects external LLM calls from
//! cascading failure, and bounds the agent loop's time/step/history growth.
//! The state machine is ported from `circuit_breaker.py`; `should_attempt`'s
//! half-open concurrency accounting follows the Python original rather than
//! the single-probe-only scheme some Rust circuit breakers use, since spec
//! §4.8 names `half_open_max_calls` as a configurable cap.

use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::RenfieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure_at: Option<Instant>,
}

/// A single named breaker. Spec §4.8 names exactly two call sites guarded
/// by a breaker (chat LLM, agent-loop LLM); callers construct one instance
/// per site rather than keying into a shared map.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: std::time::Duration,
    half_open_max_calls: u32,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: std::time::Duration, half_open_max_calls: u32) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            half_open_max_calls: half_open_max_calls.max(1),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                last_failure_at: None,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// `allow_request()` (spec §4.8): `Open` rejects until `recovery_timeout`
    /// elapses, at which point a bounded number of `HalfOpen` probes pass.
    pub async fn allow_request(&self) -> Result<(), RenfieldError> {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed_enough = state.last_failure_at.is_none_or(|t| t.elapsed() >= self.recovery_timeout);
                if elapsed_enough {
                    state.state = CircuitState::HalfOpen;
                    state.half_open_calls = 1;
                    state.success_count = 0;
                    info!(breaker = %self.name, "circuit half-open, testing recovery");
                    Ok(())
                } else {
                    Err(RenfieldError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_calls < self.half_open_max_calls {
                    state.half_open_calls += 1;
                    Ok(())
                } else {
                    Err(RenfieldError::CircuitOpen)
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.half_open_max_calls {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.half_open_calls = 0;
                    info!(breaker = %self.name, "circuit closed, service recovered");
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.half_open_calls = 0;
                state.success_count = 0;
                warn!(breaker = %self.name, "circuit re-opened after half-open failure");
            }
            CircuitState::Closed if state.failure_count >= self.failure_threshold => {
                state.state = CircuitState::Open;
                warn!(breaker = %self.name, failures = state.failure_count, "circuit opened");
            }
            _ => {}
        }
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.half_open_calls = 0;
        state.last_failure_at = None;
    }
}

/// One entry in the agent loop's trimmed prompt history: a user-visible
/// turn, or a (tool_call, tool_result) pair that must never be split apart
/// by the sliding-window trim (spec §9 Open Question resolution).
#[derive(Debug, Clone)]
pub enum HistoryEntry {
    Message { role: String, content: String },
    ToolExchange { call: String, arguments: serde_json::Value, result: String },
}

/// Trim `history` to at most `window` entries, keeping the most recent
/// ones, without ever separating a `ToolExchange` pair.
pub fn trim_history(history: &[HistoryEntry], window: usize) -> Vec<HistoryEntry> {
    if history.len() <= window {
        return history.to_vec();
    }
    history[history.len() - window..].to_vec()
}

/// Detects the agent loop making the same (tool, arguments) call
/// `window` times in a row — a sign it is stuck (spec §4.8).
pub fn detect_repeated_tool_calls(history: &[HistoryEntry], window: usize) -> bool {
    let calls: Vec<(&str, &serde_json::Value)> = history
        .iter()
        .filter_map(|e| match e {
            HistoryEntry::ToolExchange { call, arguments, .. } => Some((call.as_str(), arguments)),
            HistoryEntry::Message { .. } => None,
        })
        .collect();
    if calls.len() < window {
        return false;
    }
    let tail = &calls[calls.len() - window..];
    let (first_call, first_args) = tail[0];
    tail.iter().all(|(call, args)| *call == first_call && *args == first_args)
}

/// Budget guard the agent loop consults each step (spec §4.8): step/total
/// timeouts and a hard step cap.
pub struct AgentLoopGuard {
    pub step_timeout: std::time::Duration,
    pub total_timeout: std::time::Duration,
    pub max_steps: u32,
    started_at: Instant,
    steps_taken: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardViolation {
    TotalTimeoutExceeded,
    MaxStepsExceeded,
}

impl AgentLoopGuard {
    pub fn new(step_timeout: std::time::Duration, total_timeout: std::time::Duration, max_steps: u32) -> Self {
        Self { step_timeout, total_timeout, max_steps, started_at: Instant::now(), steps_taken: 0 }
    }

    /// Call before taking a step. `Err` means the loop must stop now.
    pub fn check(&mut self) -> Result<(), GuardViolation> {
        if self.started_at.elapsed() >= self.total_timeout {
            return Err(GuardViolation::TotalTimeoutExceeded);
        }
        if self.steps_taken >= self.max_steps {
            return Err(GuardViolation::MaxStepsExceeded);
        }
        self.steps_taken += 1;
        Ok(())
    }

    /// Wrap a single step's future in the per-step timeout.
    pub async fn run_step<F, T>(&self, fut: F) -> Result<T, RenfieldError>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(RenfieldError::Upstream),
            Err(_) => Err(RenfieldError::Timeout),
        }
    }
}
