// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Speech-to-text contract (spec §4.9).

use async_trait::async_trait;

#[async_trait]
pub trait SttClient: Send + Sync {
    async fn transcribe(&self, audio_bytes: &[u8], language: Option<&str>) -> anyhow::Result<String>;
}

pub struct HttpSttClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSttClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder().timeout(std::time::Duration::from_secs(30)).build().unwrap_or_default();
        Self { base_url, api_key, client }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl SttClient for HttpSttClient {
    async fn transcribe(&self, audio_bytes: &[u8], language: Option<&str>) -> anyhow::Result<String> {
        let part = reqwest::multipart::Part::bytes(audio_bytes.to_vec()).file_name("audio.wav");
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(lang) = language {
            form = form.text("language", lang.to_owned());
        }
        let req = self.client.post(format!("{}/v1/transcriptions", self.base_url)).multipart(form);
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        let value: serde_json::Value = resp.json().await?;
        value
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("malformed transcription response"))
    }
}
