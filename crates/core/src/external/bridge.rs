// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The home automation bridge contract (spec §4.5, §4.9): entity state
//! queries and volume/media control for bridge-backed output sinks.

use async_trait::async_trait;
use reqwest::Client;

/// States a bridge entity can report back, normalized from whatever the
/// bridge's own vocabulary is (spec §4.5 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEntityState {
    Idle,
    Paused,
    Standby,
    On,
    Playing,
    Buffering,
    Off,
    Unknown,
}

impl BridgeEntityState {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "idle" => Self::Idle,
            "paused" => Self::Paused,
            "standby" => Self::Standby,
            "on" => Self::On,
            "playing" => Self::Playing,
            "buffering" => Self::Buffering,
            "off" => Self::Off,
            _ => Self::Unknown,
        }
    }
}

/// Contract the output router (C5) and notification pipeline (C6) use to
/// talk to the home automation bridge. A thin HTTP adapter implements this
/// in production; tests substitute an in-memory fake.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    async fn get_entity_state(&self, entity_id: &str) -> anyhow::Result<BridgeEntityState>;
    async fn get_volume(&self, entity_id: &str) -> anyhow::Result<f32>;
    async fn set_volume(&self, entity_id: &str, volume: f32) -> anyhow::Result<()>;
    async fn play_audio(&self, entity_id: &str, audio_url: &str) -> anyhow::Result<()>;
}

/// HTTP-backed bridge client, grounded on the upstream HTTP adapter shape:
/// one `reqwest::Client`, one base URL, bearer auth applied uniformly.
pub struct HomeBridge {
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl HomeBridge {
    pub fn new(base_url: String, auth_token: Option<String>) -> Self {
        let client = Client::builder().timeout(std::time::Duration::from_secs(10)).build().unwrap_or_default();
        Self { base_url, auth_token, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl BridgeClient for HomeBridge {
    async fn get_entity_state(&self, entity_id: &str) -> anyhow::Result<BridgeEntityState> {
        let req = self.client.get(self.url(&format!("/api/entities/{entity_id}/state")));
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let state = body.get("state").and_then(|v| v.as_str()).unwrap_or("unknown");
        Ok(BridgeEntityState::from_str_loose(state))
    }

    async fn get_volume(&self, entity_id: &str) -> anyhow::Result<f32> {
        let req = self.client.get(self.url(&format!("/api/entities/{entity_id}/volume")));
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        Ok(body.get("volume").and_then(|v| v.as_f64()).unwrap_or(1.0) as f32)
    }

    async fn set_volume(&self, entity_id: &str, volume: f32) -> anyhow::Result<()> {
        let body = serde_json::json!({ "volume": volume });
        let req = self.client.post(self.url(&format!("/api/entities/{entity_id}/volume"))).json(&body);
        self.apply_auth(req).send().await?.error_for_status()?;
        Ok(())
    }

    async fn play_audio(&self, entity_id: &str, audio_url: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({ "media_content_id": audio_url, "media_content_type": "music" });
        let req = self.client.post(self.url(&format!("/api/entities/{entity_id}/play"))).json(&body);
        self.apply_auth(req).send().await?.error_for_status()?;
        Ok(())
    }
}
