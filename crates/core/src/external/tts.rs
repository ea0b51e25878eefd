// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Text-to-speech contract (spec §4.9): renders 16-bit PCM mono WAV at a
//! nominal 16kHz.

use async_trait::async_trait;

#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(&self, text: &str, language: Option<&str>) -> anyhow::Result<Vec<u8>>;
}

pub struct HttpTtsClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpTtsClient {
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
impl TtsClient for HttpTtsClient {
    async fn synthesize(&self, text: &str, language: Option<&str>) -> anyhow::Result<Vec<u8>> {
        let body = serde_json::json!({ "text": text, "language": language });
        let req = self.client.post(format!("{}/v1/speech", self.base_url)).json(&body);
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    #[derive(Default)]
    pub struct FakeTts;

    #[async_trait]
    impl TtsClient for FakeTts {
        async fn synthesize(&self, text: &str, _language: Option<&str>) -> anyhow::Result<Vec<u8>> {
            Ok(text.as_bytes().to_vec())
        }
    }
}
