use anyhow::{Context, Result};
use dashmap::DashSet;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use ingest::SectionSummary;

use crate::edge_store::point_id;
use crate::embeddings::EmbeddingClient;

/// A scored candidate section from the summary index.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SummaryHit {
    pub section_id: String,
    pub title: String,
    pub summary: String,
    pub is_fallback: bool,
    pub score: f32,
}

/// Per-project vector index of section summaries. Guide execution
/// searches this to pick candidate sections for targeted extraction.
pub struct SummaryIndex {
    base_url: String,
    client: reqwest::Client,
    embedding_client: EmbeddingClient,
    known_collections: Arc<DashSet<String>>,
}

impl SummaryIndex {
    pub fn new(base_url: String, embedding_client: EmbeddingClient) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            embedding_client,
            known_collections: Arc::new(DashSet::new()),
        }
    }

    fn collection_name(project_id: &str) -> String {
        format!("sections_{project_id}")
    }

    /// Upsert one section summary. Point identity comes from the section
    /// ID, so re-ingestion replaces rather than duplicates.
    pub async fn store_summary(&self, project_id: &str, summary: &SectionSummary) -> Result<()> {
        let collection = Self::collection_name(project_id);
        self.ensure_collection(&collection).await?;

        let text = format!("{}\n{}", summary.title, summary.summary);
        let embedding = self
            .embedding_client
            .embed(&text)
            .await
            .context("Failed to embed section summary")?;

        let url = format!("{}/collections/{}/points", self.base_url, collection);
        let body = json!({
            "points": [{
                "id": point_id(&format!("{}|{}", project_id, summary.section_id)),
                "vector": embedding,
                "payload": {
                    "project_id": project_id,
                    "section_id": summary.section_id,
                    "title": summary.title,
                    "summary": summary.summary,
                    "subjects": summary.subjects,
                    "key_topics": summary.key_topics,
                    "is_fallback": summary.is_fallback,
                }
            }]
        });

        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to upsert section summary")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%collection, %status, text, "Summary upsert rejected");
            anyhow::bail!("Summary upsert failed: {}", status);
        }

        Ok(())
    }

    /// Top-N candidate sections for a query, with an optional score
    /// floor.
    pub async fn search(
        &self,
        project_id: &str,
        query_text: &str,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SummaryHit>> {
        let collection = Self::collection_name(project_id);
        let query_embedding = self
            .embedding_client
            .embed(query_text)
            .await
            .context("Failed to embed summary query")?;

        let mut body = json!({
            "vector": query_embedding,
            "limit": limit,
            "with_payload": true,
            "filter": {
                "must": [{
                    "key": "project_id",
                    "match": { "value": project_id }
                }]
            }
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }

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
            .context("Failed to search summary index")?;

        if !response.status().is_success() {
            anyhow::bail!("Summary search failed: {}", response.status());
        }

        let result: Value = response.json().await?;
        let points = result["result"]
            .as_array()
            .context("Invalid summary search response")?;

        Ok(points
            .iter()
            .map(|p| {
                let payload = &p["payload"];
                SummaryHit {
                    section_id: payload["section_id"].as_str().unwrap_or("").to_string(),
                    title: payload["title"].as_str().unwrap_or("").to_string(),
                    summary: payload["summary"].as_str().unwrap_or("").to_string(),
                    is_fallback: payload["is_fallback"].as_bool().unwrap_or(false),
                    score: p["score"].as_f64().unwrap_or(0.0) as f32,
                }
            })
            .collect())
    }

    pub async fn delete_collection(&self, project_id: &str) -> Result<()> {
        let collection = Self::collection_name(project_id);
        let url = format!("{}/collections/{}", self.base_url, collection);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to delete summary collection")?;

        if !response.status().is_success() {
            anyhow::bail!("Collection delete failed: {}", response.status());
        }

        self.known_collections.remove(&collection);
        Ok(())
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
        info!(%collection, dimension, "Creating summary collection");

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
