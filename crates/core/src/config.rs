// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the Renfield coordination core.
///
/// Every timeout, threshold, cap, retention window, and feature flag the
/// coordination core needs is represented here and is configurable via CLI
/// flag or environment variable. Runtime mutability beyond startup is limited to
/// the wake-word settings (C3) and the webhook bearer token (C6), both of
/// which live in `SystemSetting` rows, not here.
#[derive(Debug, Clone, clap::Args)]
pub struct RenfieldConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "RENFIELD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000, env = "RENFIELD_PORT")]
    pub port: u16,

    /// Enable authentication on HTTP/WS endpoints.
    #[arg(long, default_value_t = false, env = "RENFIELD_AUTH_ENABLED")]
    pub auth_enabled: bool,

    /// Secret key backing auth. Fatal at startup if auth is enabled and this
    /// is left at the documented default.
    #[arg(long, default_value = "changeme-in-production", env = "RENFIELD_SECRET_KEY")]
    pub secret_key: String,

    /// Webhook bearer token (C6 ingress). Stored as a SystemSetting at
    /// startup if not already present; rotatable at runtime thereafter.
    #[arg(long, env = "RENFIELD_WEBHOOK_TOKEN")]
    pub webhook_token: Option<String>,

    /// Base URL this core is reachable at from the home-automation bridge,
    /// used to build the pull URL for `GET /tts-cache/{id}` (spec §4.9).
    #[arg(long, default_value = "http://localhost:8000", env = "RENFIELD_PUBLIC_BASE_URL")]
    pub public_base_url: String,

    // -- Device registry / session manager (C1/C2) --------------------------
    /// Heartbeat timeout: a device with no heartbeat for this long is reaped.
    #[arg(long, default_value_t = 30_000, env = "RENFIELD_HEARTBEAT_TIMEOUT_MS")]
    pub heartbeat_timeout_ms: u64,

    /// How often the reaper sweeps stale devices/sessions.
    #[arg(long, default_value_t = 5_000, env = "RENFIELD_REAPER_INTERVAL_MS")]
    pub reaper_interval_ms: u64,

    /// Maximum session duration before it is ended with reason=timeout.
    #[arg(long, default_value_t = 30, env = "RENFIELD_SESSION_MAX_DURATION_SECS")]
    pub session_max_duration_secs: u64,

    /// Max size of a single inbound WebSocket frame, in bytes.
    #[arg(long, default_value_t = 1_000_000, env = "RENFIELD_WS_MAX_MESSAGE_SIZE")]
    pub ws_max_message_size: usize,

    /// Max cumulative audio buffer size per session, in bytes.
    #[arg(long, default_value_t = 10_000_000, env = "RENFIELD_WS_MAX_AUDIO_BUFFER_SIZE")]
    pub ws_max_audio_buffer_size: usize,

    // -- Wake-word config fabric (C3) ---------------------------------------
    /// Default wake-word keyword, used when no SystemSetting row exists yet.
    #[arg(long, default_value = "hey_renfield", env = "RENFIELD_WAKE_WORD_DEFAULT")]
    pub wake_word_default: String,

    /// Default wake-word detection threshold (0.1-1.0).
    #[arg(long, default_value_t = 0.5, env = "RENFIELD_WAKE_WORD_THRESHOLD")]
    pub wake_word_threshold_default: f32,

    /// Default wake-word cooldown in milliseconds (500-10000).
    #[arg(long, default_value_t = 2000, env = "RENFIELD_WAKE_WORD_COOLDOWN_MS")]
    pub wake_word_cooldown_ms_default: u32,

    /// Master enable flag for local wake-word detection.
    #[arg(long, default_value_t = true, env = "RENFIELD_WAKE_WORD_ENABLED")]
    pub wake_word_enabled: bool,

    // -- Presence tracker (C4) -----------------------------------------------
    /// RSSI floor below which a sighting is dropped (dBm, negative).
    #[arg(long, default_value_t = -80, env = "RENFIELD_PRESENCE_RSSI_THRESHOLD")]
    pub presence_rssi_threshold: i32,

    /// How long a sighting stays valid before it is pruned, in seconds.
    #[arg(long, default_value_t = 120, env = "RENFIELD_PRESENCE_STALE_TIMEOUT_SECS")]
    pub presence_stale_timeout_secs: u64,

    /// Consecutive favoring observations required to commit a room change.
    #[arg(long, default_value_t = 2, env = "RENFIELD_PRESENCE_HYSTERESIS_SCANS")]
    pub presence_hysteresis_scans: u32,

    /// Whether presence tracking is enabled at all (fail-safe gate for C6).
    #[arg(long, default_value_t = true, env = "RENFIELD_PRESENCE_ENABLED")]
    pub presence_enabled: bool,

    // -- Output router (C5) --------------------------------------------------
    /// Timeout for a single local/bridge availability probe, in milliseconds.
    #[arg(long, default_value_t = 1_500, env = "RENFIELD_ROUTER_PROBE_TIMEOUT_MS")]
    pub router_probe_timeout_ms: u64,

    /// Calibration constant for estimating bridge playback duration from WAV
    /// byte length when no header is trusted (bytes/sec of 16-bit PCM mono).
    /// Flagged in spec §9 as an Open Question; kept explicit and
    /// configurable rather than hard-coded.
    #[arg(long, default_value_t = 32_000, env = "RENFIELD_BRIDGE_PCM_RATE_BYTES_PER_SEC")]
    pub bridge_pcm_rate_bytes_per_sec: u64,

    /// Extra margin added to the estimated playback duration before restoring
    /// bridge volume, in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "RENFIELD_BRIDGE_VOLUME_RESTORE_MARGIN_MS")]
    pub bridge_volume_restore_margin_ms: u64,

    // -- Notification pipeline (C6) ------------------------------------------
    /// Dedup suppression window, in seconds.
    #[arg(long, default_value_t = 60, env = "RENFIELD_NOTIFY_SUPPRESSION_WINDOW_SECS")]
    pub notify_suppression_window_secs: u64,

    /// Default notification TTL (expires_at = created_at + ttl), in seconds.
    #[arg(long, default_value_t = 86_400, env = "RENFIELD_NOTIFY_DEFAULT_TTL_SECS")]
    pub notify_default_ttl_secs: u64,

    /// Bounded in-memory dedup cache capacity (recently seen keys).
    #[arg(long, default_value_t = 1_000, env = "RENFIELD_NOTIFY_DEDUP_CACHE_CAP")]
    pub notify_dedup_cache_cap: usize,

    /// Expiry sweep interval, in seconds.
    #[arg(long, default_value_t = 300, env = "RENFIELD_NOTIFY_SWEEP_INTERVAL_SECS")]
    pub notify_sweep_interval_secs: u64,

    /// Poller interval for each registered integration, in seconds.
    #[arg(long, default_value_t = 60, env = "RENFIELD_NOTIFY_POLL_INTERVAL_SECS")]
    pub notify_poll_interval_secs: u64,

    // -- Reminders + scheduler (C7) -------------------------------------------
    /// How often the reminder ticker scans for due reminders, in seconds.
    #[arg(long, default_value_t = 5, env = "RENFIELD_REMINDER_TICK_SECS")]
    pub reminder_tick_secs: u64,

    /// How often the cron scheduler loop scans for due jobs, in seconds.
    #[arg(long, default_value_t = 30, env = "RENFIELD_SCHEDULER_TICK_SECS")]
    pub scheduler_tick_secs: u64,

    // -- Circuit breaker + budget guards (C8) ---------------------------------
    /// Consecutive failures before a breaker opens.
    #[arg(long, default_value_t = 3, env = "RENFIELD_BREAKER_FAILURE_THRESHOLD")]
    pub breaker_failure_threshold: u32,

    /// Seconds an open breaker waits before allowing a half-open probe.
    #[arg(long, default_value_t = 30, env = "RENFIELD_BREAKER_RECOVERY_TIMEOUT_SECS")]
    pub breaker_recovery_timeout_secs: u64,

    /// Max concurrent probe calls allowed while half-open.
    #[arg(long, default_value_t = 1, env = "RENFIELD_BREAKER_HALF_OPEN_MAX_CALLS")]
    pub breaker_half_open_max_calls: u32,

    /// Per-step timeout for the agent loop, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "RENFIELD_AGENT_STEP_TIMEOUT_MS")]
    pub agent_step_timeout_ms: u64,

    /// Total timeout for a whole agent loop, in milliseconds.
    #[arg(long, default_value_t = 120_000, env = "RENFIELD_AGENT_TOTAL_TIMEOUT_MS")]
    pub agent_total_timeout_ms: u64,

    /// Maximum number of steps an agent loop may take.
    #[arg(long, default_value_t = 12, env = "RENFIELD_AGENT_MAX_STEPS")]
    pub agent_max_steps: u32,

    /// Sliding-window size (in steps) kept in the agent's prompt history.
    #[arg(long, default_value_t = 8, env = "RENFIELD_AGENT_HISTORY_WINDOW")]
    pub agent_history_window: usize,

    /// Number of trailing identical (tool, parameters) calls that trips the
    /// infinite-loop detector.
    #[arg(long, default_value_t = 3, env = "RENFIELD_AGENT_LOOP_DETECT_WINDOW")]
    pub agent_loop_detect_window: usize,

    // -- External contracts (C9) ---------------------------------------------
    /// Timeout for a home-automation bridge service call, in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "RENFIELD_BRIDGE_SERVICE_TIMEOUT_MS")]
    pub bridge_service_timeout_ms: u64,

    /// Timeout for a home-automation bridge state probe, in milliseconds.
    #[arg(long, default_value_t = 2_000, env = "RENFIELD_BRIDGE_STATE_TIMEOUT_MS")]
    pub bridge_state_timeout_ms: u64,

    /// Max age of a cached TTS audio file before the sweep deletes it, in
    /// seconds.
    #[arg(long, default_value_t = 3_600, env = "RENFIELD_TTS_CACHE_MAX_AGE_SECS")]
    pub tts_cache_max_age_secs: u64,

    /// Directory for cached TTS audio.
    #[arg(long, default_value = "/tmp/renfield-tts-cache", env = "RENFIELD_TTS_CACHE_DIR")]
    pub tts_cache_dir: std::path::PathBuf,

    /// Base URL of the OpenAI-compatible chat/completions + embeddings service.
    #[arg(long, default_value = "http://localhost:11434/v1", env = "RENFIELD_LLM_BASE_URL")]
    pub llm_base_url: String,

    /// Bearer API key for the LLM service, if required.
    #[arg(long, env = "RENFIELD_LLM_API_KEY")]
    pub llm_api_key: Option<String>,

    /// Chat model used for the agent loop and scheduled briefings.
    #[arg(long, default_value = "default", env = "RENFIELD_LLM_MODEL")]
    pub briefing_model: String,

    /// Language the scheduled briefing is generated in.
    #[arg(long, default_value = "en", env = "RENFIELD_BRIEFING_LANGUAGE")]
    pub briefing_language: String,

    /// Base URL of the speech-to-text service.
    #[arg(long, default_value = "http://localhost:11435", env = "RENFIELD_STT_BASE_URL")]
    pub stt_base_url: String,

    /// Bearer API key for the STT service, if required.
    #[arg(long, env = "RENFIELD_STT_API_KEY")]
    pub stt_api_key: Option<String>,

    /// Base URL of the text-to-speech service.
    #[arg(long, default_value = "http://localhost:11436", env = "RENFIELD_TTS_BASE_URL")]
    pub tts_base_url: String,

    /// Bearer API key for the TTS service, if required.
    #[arg(long, env = "RENFIELD_TTS_API_KEY")]
    pub tts_api_key: Option<String>,

    /// Base URL of the speaker-identification service.
    #[arg(long, default_value = "http://localhost:11437", env = "RENFIELD_SPEAKER_BASE_URL")]
    pub speaker_base_url: String,

    /// Bearer API key for the speaker-identification service, if required.
    #[arg(long, env = "RENFIELD_SPEAKER_API_KEY")]
    pub speaker_api_key: Option<String>,

    /// Base URL of the home-automation bridge (spec §4.9).
    #[arg(long, default_value = "http://localhost:8123", env = "RENFIELD_BRIDGE_BASE_URL")]
    pub bridge_base_url: String,

    /// Auth token for the home-automation bridge, if required.
    #[arg(long, env = "RENFIELD_BRIDGE_AUTH_TOKEN")]
    pub bridge_auth_token: Option<String>,
}

impl RenfieldConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn session_max_duration(&self) -> Duration {
        Duration::from_secs(self.session_max_duration_secs)
    }

    pub fn router_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.router_probe_timeout_ms)
    }

    pub fn notify_suppression_window(&self) -> Duration {
        Duration::from_secs(self.notify_suppression_window_secs)
    }

    pub fn notify_default_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.notify_default_ttl_secs as i64)
    }

    pub fn notify_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.notify_sweep_interval_secs)
    }

    pub fn reminder_tick_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_tick_secs)
    }

    pub fn scheduler_tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_secs)
    }

    pub fn breaker_recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.breaker_recovery_timeout_secs)
    }

    pub fn agent_step_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_step_timeout_ms)
    }

    pub fn agent_total_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_total_timeout_ms)
    }

    pub fn bridge_service_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_service_timeout_ms)
    }

    pub fn bridge_state_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_state_timeout_ms)
    }

    /// The only fatal-at-startup condition (spec §6/§7): auth enabled with
    /// the documented default secret.
    pub fn validate_startup(&self) -> Result<(), String> {
        if self.auth_enabled && self.secret_key == "changeme-in-production" {
            return Err(
                "auth_enabled=true but secret_key is left at the default value".to_owned()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(clap::Parser)]
    struct Harness {
        #[command(flatten)]
        cfg: RenfieldConfig,
    }

    fn default_config() -> RenfieldConfig {
        Harness::parse_from(["renfield"]).cfg
    }

    #[test]
    fn startup_guard_trips_on_default_secret_with_auth_enabled() {
        let mut cfg = default_config();
        cfg.auth_enabled = true;
        assert!(cfg.validate_startup().is_err());
    }

    #[test]
    fn startup_guard_passes_with_custom_secret() {
        let mut cfg = default_config();
        cfg.auth_enabled = true;
        cfg.secret_key = "a-real-secret".to_owned();
        assert!(cfg.validate_startup().is_ok());
    }

    #[test]
    fn startup_guard_passes_with_auth_disabled() {
        let cfg = default_config();
        assert!(cfg.validate_startup().is_ok());
    }
}
