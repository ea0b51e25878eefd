// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Speaker identification contract (spec §4.9) — optional: households that
//! never enroll a voiceprint simply get `None` back from `identify`.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct EnrolledSpeaker {
    pub id: String,
    pub name: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct SpeakerMatch {
    pub id: String,
    pub name: String,
    pub score: f32,
}

#[async_trait]
pub trait SpeakerIdClient: Send + Sync {
    async fn extract_embedding(&self, audio: &[u8]) -> anyhow::Result<Vec<f32>>;

    /// Identify the closest enrolled speaker by cosine similarity, subject
    /// to `threshold`; `None` if nothing clears the bar.
    async fn identify(
        &self,
        embedding: &[f32],
        enrolled: &[EnrolledSpeaker],
        threshold: f32,
    ) -> anyhow::Result<Option<SpeakerMatch>>;
}

pub struct HttpSpeakerIdClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSpeakerIdClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder().timeout(std::time::Duration::from_secs(15)).build().unwrap_or_default();
        Self { base_url, api_key, client }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl SpeakerIdClient for HttpSpeakerIdClient {
    async fn extract_embedding(&self, audio: &[u8]) -> anyhow::Result<Vec<f32>> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec()).file_name("audio.wav");
        let form = reqwest::multipart::Form::new().part("file", part);
        let req = self.client.post(format!("{}/v1/embed", self.base_url)).multipart(form);
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        let value: serde_json::Value = resp.json().await?;
        value
            .get("embedding")
            .and_then(|e| e.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
            .ok_or_else(|| anyhow::anyhow!("malformed embedding response"))
    }

    async fn identify(
        &self,
        embedding: &[f32],
        enrolled: &[EnrolledSpeaker],
        threshold: f32,
    ) -> anyhow::Result<Option<SpeakerMatch>> {
        let best = enrolled
            .iter()
            .map(|s| (s, cosine_similarity(embedding, &s.embedding)))
            .max_by(|(_, a), (_, b)| a.total_cmp(b));

        Ok(best.filter(|(_, score)| *score >= threshold).map(|(s, score)| SpeakerMatch {
            id: s.id.clone(),
            name: s.name.clone(),
            score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[tokio::test]
    async fn identify_returns_none_below_threshold() {
        let client = HttpSpeakerIdClient::new("http://localhost".into(), None);
        let enrolled = vec![EnrolledSpeaker { id: "u1".into(), name: "Alice".into(), embedding: vec![0.0, 1.0] }];
        let result = client.identify(&[1.0, 0.0], &enrolled, 0.9).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn identify_returns_best_match_above_threshold() {
        let client = HttpSpeakerIdClient::new("http://localhost".into(), None);
        let enrolled = vec![
            EnrolledSpeaker { id: "u1".into(), name: "Alice".into(), embedding: vec![0.0, 1.0] },
            EnrolledSpeaker { id: "u2".into(), name: "Bob".into(), embedding: vec![1.0, 0.0] },
        ];
        let result = client.identify(&[1.0, 0.0], &enrolled, 0.5).await.unwrap().unwrap();
        assert_eq!(result.id, "u2");
    }
}
