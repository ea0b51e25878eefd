// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cached TTS server (spec §4.9): writes synthesized audio to a temp
//! directory under an opaque id so the home bridge can pull it back over
//! HTTP for playback, with a periodic sweep of aged-out files.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RenfieldConfig;

pub struct TtsCache {
    dir: PathBuf,
    max_age: chrono::Duration,
}

impl TtsCache {
    pub fn new(config: &RenfieldConfig) -> anyhow::Result<Self> {
        let dir = PathBuf::from(&config.tts_cache_dir);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_age: chrono::Duration::seconds(config.tts_cache_max_age_secs as i64) })
    }

    /// Store `wav_bytes` under a freshly generated opaque id, returning it.
    pub async fn put(&self, wav_bytes: &[u8]) -> anyhow::Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let path = self.dir.join(format!("{id}.wav"));
        tokio::fs::write(&path, wav_bytes).await?;
        Ok(id)
    }

    /// Fetch cached audio by the opaque id `put` returned.
    pub async fn get(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        if !is_safe_id(id) {
            return Ok(None);
        }
        let path = self.dir.join(format!("{id}.wav"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every cached file whose modification time is older than the
    /// configured max age.
    pub async fn sweep(&self) -> anyhow::Result<u64> {
        let mut removed = 0u64;
        let now = std::time::SystemTime::now();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            let Ok(age) = now.duration_since(modified) else { continue };
            if chrono::Duration::from_std(age).unwrap_or_default() > self.max_age {
                if tokio::fs::remove_file(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

pub fn spawn_sweeper(cache: Arc<TtsCache>, interval: std::time::Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            if let Err(e) = cache.sweep().await {
                warn!(err = %e, "tts cache sweep failed");
            }
        }
    });
}
