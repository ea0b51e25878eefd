// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LLM contract (spec §4.9): chat/generate/embeddings, guarded by C8's
//! circuit breakers at the call site, never inside the adapter itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, model: &str, messages: &[ChatMessage], options: &ChatOptions) -> anyhow::Result<String>;
    async fn generate(&self, model: &str, prompt: &str, options: &ChatOptions) -> anyhow::Result<String>;
    async fn embeddings(&self, model: &str, prompt: &str) -> anyhow::Result<Vec<f32>>;
}

/// Thin HTTP adapter for an OpenAI-compatible chat/completions/embeddings API.
pub struct HttpLlmClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder().timeout(std::time::Duration::from_secs(60)).build().unwrap_or_default();
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
impl LlmClient for HttpLlmClient {
    async fn chat(&self, model: &str, messages: &[ChatMessage], options: &ChatOptions) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        let req = self.client.post(format!("{}/chat/completions", self.base_url)).json(&body);
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        let value: serde_json::Value = resp.json().await?;
        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("malformed chat completion response"))
    }

    async fn generate(&self, model: &str, prompt: &str, options: &ChatOptions) -> anyhow::Result<String> {
        self.chat(model, &[ChatMessage { role: ChatRole::User, content: prompt.to_owned() }], options).await
    }

    async fn embeddings(&self, model: &str, prompt: &str) -> anyhow::Result<Vec<f32>> {
        let body = serde_json::json!({ "model": model, "input": prompt });
        let req = self.client.post(format!("{}/embeddings", self.base_url)).json(&body);
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        let value: serde_json::Value = resp.json().await?;
        value
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
            .ok_or_else(|| anyhow::anyhow!("malformed embeddings response"))
    }
}
