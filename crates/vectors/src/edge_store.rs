use anyhow::{Context, Result};
use dashmap::DashSet;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::embeddings::EmbeddingClient;

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// One relationship to be embedded and indexed.
#[derive(Debug, Clone)]
pub struct EdgeEmbeddingJob {
    pub from: String,
    pub rel_type: String,
    pub to: String,
    pub confidence: f64,
    /// Human-readable description of the edge, the text that gets
    /// embedded, e.g. "CB_1A protects TR_1".
    pub embedding_text: String,
    pub attributes: HashMap<String, Value>,
}

impl EdgeEmbeddingJob {
    pub fn edge_key(&self, project_id: &str) -> String {
        format!("{}|{}|{}|{}", project_id, self.from, self.rel_type, self.to)
    }
}

/// A search hit over the edge index.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EdgeHit {
    pub edge_key: String,
    pub from: String,
    pub rel_type: String,
    pub to: String,
    pub confidence: f64,
    pub embedding_text: String,
    pub score: f32,
    pub attributes: Value,
}

/// Per-project vector index of relationship embeddings, talking to
/// Qdrant over its REST API. Collections are created lazily on first
/// write and named after the project.
pub struct EdgeVectorStore {
    base_url: String,
    client: reqwest::Client,
    embedding_client: EmbeddingClient,
    batch_size: usize,
    known_collections: Arc<DashSet<String>>,
}

impl EdgeVectorStore {
    pub fn new(base_url: String, embedding_client: EmbeddingClient, batch_size: usize) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            embedding_client,
            batch_size: batch_size.max(1),
            known_collections: Arc::new(DashSet::new()),
        }
    }

    fn collection_name(project_id: &str) -> String {
        format!("edges_{project_id}")
    }

    /// Embed and upsert a set of edges. Upserts run in fixed-size
    /// batches; a failed batch is logged and excluded from the returned
    /// count while the remaining batches still commit.
    pub async fn store_edge_embeddings(
        &self,
        project_id: &str,
        edges: &[EdgeEmbeddingJob],
    ) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }

        let collection = Self::collection_name(project_id);
        self.ensure_collection(&collection).await?;

        let mut points = Vec::with_capacity(edges.len());
        for edge in edges {
            let embedding = match self.embedding_client.embed(&edge.embedding_text).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        edge = %edge.edge_key(project_id),
                        error = %e,
                        "Skipping edge that failed to embed"
                    );
                    continue;
                }
            };

            let edge_key = edge.edge_key(project_id);
            points.push(json!({
                "id": point_id(&edge_key),
                "vector": embedding,
                "payload": {
                    "edge_key": edge_key,
                    "project_id": project_id,
                    "from": edge.from,
                    "rel_type": edge.rel_type,
                    "to": edge.to,
                    "confidence": edge.confidence,
                    "embedding_text": edge.embedding_text,
                    "attributes": edge.attributes,
                }
            }));
        }

        let url = format!("{}/collections/{}/points", self.base_url, collection);
        let mut stored = 0usize;

        for batch in points.chunks(self.batch_size) {
            let response = self
                .client
                .put(&url)
                .json(&json!({ "points": batch }))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => stored += batch.len(),
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(%collection, %status, body, "Edge batch upsert rejected");
                }
                Err(e) => {
                    warn!(%collection, error = %e, "Edge batch upsert failed");
                }
            }
        }

        Ok(stored)
    }

    /// Similarity search with a mandatory project filter plus optional
    /// relation-type equality and confidence-floor filters.
    pub async fn search(
        &self,
        project_id: &str,
        query_text: &str,
        limit: usize,
        relation_type: Option<&str>,
        min_confidence: Option<f64>,
    ) -> Result<Vec<EdgeHit>> {
        let collection = Self::collection_name(project_id);
        let query_embedding = self
            .embedding_client
            .embed(query_text)
            .await
            .context("Failed to embed query text")?;

        let mut must = vec![json!({
            "key": "project_id",
            "match": { "value": project_id }
        })];
        if let Some(rel_type) = relation_type {
            must.push(json!({
                "key": "rel_type",
                "match": { "value": rel_type }
            }));
        }
        if let Some(floor) = min_confidence {
            must.push(json!({
                "key": "confidence",
                "range": { "gte": floor }
            }));
        }

        let body = json!({
            "vector": query_embedding,
            "limit": limit,
            "with_payload": true,
            "filter": { "must": must }
        });

        self.run_search(&collection, body).await
    }

    /// Edges touching one entity, optionally ranked against a query.
    /// Without a query this is a filter-only scroll.
    pub async fn search_by_entity(
        &self,
        project_id: &str,
        entity_key: &str,
        query_text: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EdgeHit>> {
        let collection = Self::collection_name(project_id);

        let filter = json!({
            "must": [{
                "key": "project_id",
                "match": { "value": project_id }
            }],
            "should": [
                { "key": "from", "match": { "value": entity_key } },
                { "key": "to", "match": { "value": entity_key } }
            ]
        });

        match query_text {
            Some(text) => {
                let query_embedding = self
                    .embedding_client
                    .embed(text)
                    .await
                    .context("Failed to embed query text")?;
                let body = json!({
                    "vector": query_embedding,
                    "limit": limit,
                    "with_payload": true,
                    "filter": filter
                });
                self.run_search(&collection, body).await
            }
            None => {
                let url = format!(
                    "{}/collections/{}/points/scroll",
                    self.base_url, collection
                );
                let body = json!({
                    "limit": limit,
                    "with_payload": true,
                    "filter": filter
                });

                let response = self
                    .client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .context("Failed to scroll edge collection")?;

                if !response.status().is_success() {
                    anyhow::bail!("Edge scroll failed: {}", response.status());
                }

                let result: Value = response.json().await?;
                let points = result["result"]["points"]
                    .as_array()
                    .context("Invalid scroll response format")?;

                Ok(points.iter().map(|p| parse_hit(p, 0.0)).collect())
            }
        }
    }

    /// Drop the project's edge collection. Part of project teardown.
    pub async fn delete_collection(&self, project_id: &str) -> Result<()> {
        let collection = Self::collection_name(project_id);
        let url = format!("{}/collections/{}", self.base_url, collection);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to delete edge collection")?;

        if !response.status().is_success() {
            anyhow::bail!("Collection delete failed: {}", response.status());
        }

        self.known_collections.remove(&collection);
        Ok(())
    }

    async fn run_search(&self, collection: &str, body: Value) -> Result<Vec<EdgeHit>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, collection
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send edge search request")?;

        if !response.status().is_success() {
            anyhow::bail!("Edge search failed: {}", response.status());
        }

        let result: Value = response.json().await?;
        let points = result["result"]
            .as_array()
            .context("Invalid search response format")?;

        Ok(points
            .iter()
            .map(|p| {
                let score = p["score"].as_f64().unwrap_or(0.0) as f32;
                parse_hit(p, score)
            })
            .collect())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        if self.known_collections.contains(collection) {
            return Ok(());
        }

        let url = format!("{}/collections/{}", self.base_url, collection);
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            self.known_collections.insert(collection.to_string());
            return Ok(());
        }

        let dimension = self.embedding_client.get_dimension().await?;
        info!(%collection, dimension, "Creating edge collection");

        let response = self
            .client
            .put(&url)
            .json(&json!({
                "vectors": { "size": dimension, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to create collection: {}", body);
        }

        self.known_collections.insert(collection.to_string());
        Ok(())
    }
}

fn parse_hit(point: &Value, score: f32) -> EdgeHit {
    let payload = &point["payload"];
    EdgeHit {
        edge_key: str_field(payload, "edge_key"),
        from: str_field(payload, "from"),
        rel_type: str_field(payload, "rel_type"),
        to: str_field(payload, "to"),
        confidence: payload["confidence"].as_f64().unwrap_or(0.0),
        embedding_text: str_field(payload, "embedding_text"),
        score,
        attributes: payload["attributes"].clone(),
    }
}

fn str_field(payload: &Value, key: &str) -> String {
    payload[key].as_str().unwrap_or("").to_string()
}

/// Stable point ID: first 8 bytes of SHA-256 of the edge key, so
/// re-ingesting the same relationship overwrites its point in place.
pub fn point_id(edge_key: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(edge_key.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("8-byte slice"))
}
