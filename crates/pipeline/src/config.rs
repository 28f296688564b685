use serde::{Deserialize, Serialize};

/// Top-level configuration. Every client is constructed from this and
/// handed to the orchestrators explicitly; there is no ambient global
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub graph: GraphConfig,
    pub vectors: VectorConfig,
    pub guides: GuideConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub base_url: String,
    pub batch_size: usize,
    /// Confidence floor applied by the query orchestrator.
    pub min_confidence: f64,
    /// Neighborhood expansion depth for query context.
    pub context_hops: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideConfig {
    /// Top-N candidate sections retrieved per guide.
    pub candidate_sections: usize,
    /// Minimum summary-search score for a candidate section.
    pub score_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Simultaneous project syncs in the background service.
    pub max_concurrent_syncs: usize,
    /// Minimum seconds between two syncs of the same project.
    pub min_sync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3".to_string(),
                temperature: 0.1,
                max_tokens: 2048,
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "nomic-embed-text".to_string(),
            },
            graph: GraphConfig {
                uri: "bolt://localhost:7687".to_string(),
                user: "neo4j".to_string(),
                password: "neo4j".to_string(),
            },
            vectors: VectorConfig {
                base_url: "http://localhost:6333".to_string(),
                batch_size: vectors::DEFAULT_BATCH_SIZE,
                min_confidence: 0.5,
                context_hops: 2,
            },
            guides: GuideConfig {
                candidate_sections: 5,
                score_threshold: 0.35,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_syncs: 3,
                min_sync_interval_secs: 300,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
        }
    }
}

impl AppConfig {
    /// Preset for bulk re-ingestion: more parallel syncs, no sync
    /// cooldown, fewer retries.
    pub fn bulk_mode() -> Self {
        let mut config = Self::default();
        config.concurrency.max_concurrent_syncs = 8;
        config.concurrency.min_sync_interval_secs = 0;
        config.retry.max_retries = 1;
        config
    }
}
