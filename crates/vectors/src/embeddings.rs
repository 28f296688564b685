use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const CACHE_MAX_ENTRIES: usize = 10_000;

/// Embedding endpoint client with a bounded in-memory cache keyed by a
/// hash of the input text.
#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    cache: Arc<DashMap<String, Vec<f32>>>,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
            cache: Arc::new(DashMap::new()),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = hash_text(text);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.value().clone());
        }

        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Embedding request failed: {}", response.status());
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if self.cache.len() >= CACHE_MAX_ENTRIES {
            // Simple eviction: clear a quarter when full.
            let to_remove: Vec<_> = self
                .cache
                .iter()
                .take(CACHE_MAX_ENTRIES / 4)
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.cache.remove(&key);
            }
        }
        self.cache.insert(key, body.embedding.clone());

        Ok(body.embedding)
    }

    /// Probe the embedding dimension with a throwaway input.
    pub async fn get_dimension(&self) -> Result<usize> {
        let probe = self.embed("dimension probe").await?;
        Ok(probe.len())
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
