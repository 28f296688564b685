use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use graph::{GraphStore, Neighborhood, RelationRecord};
use vectors::{EdgeHit, EdgeVectorStore};

pub const NO_RESULTS_MESSAGE: &str =
    "No relevant information was found in this project's knowledge graph.";

/// A citation pointing at the relationship a context block came from.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCitation {
    pub edge_key: String,
    pub description: String,
    pub confidence: f64,
    pub relevance_score: f32,
}

/// Context assembled for downstream answer generation. An empty search
/// is a valid outcome (`no_results = true`), not an error.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer_context: String,
    pub sources: Vec<SourceCitation>,
    pub graph_paths: Vec<RelationRecord>,
    pub no_results: bool,
}

impl QueryOutcome {
    fn no_relevant_information() -> Self {
        Self {
            answer_context: NO_RESULTS_MESSAGE.to_string(),
            sources: Vec::new(),
            graph_paths: Vec::new(),
            no_results: true,
        }
    }
}

/// Hybrid retrieval: vector search over relationship embeddings plus
/// graph-neighborhood expansion around the matched edges.
pub struct QueryOrchestrator {
    edge_store: Arc<EdgeVectorStore>,
    graph_store: Arc<GraphStore>,
    min_confidence: f64,
    context_hops: usize,
}

impl QueryOrchestrator {
    pub fn new(
        edge_store: Arc<EdgeVectorStore>,
        graph_store: Arc<GraphStore>,
        min_confidence: f64,
        context_hops: usize,
    ) -> Self {
        Self {
            edge_store,
            graph_store,
            min_confidence,
            context_hops,
        }
    }

    pub async fn query(
        &self,
        project_id: &str,
        query_text: &str,
        max_results: usize,
    ) -> Result<QueryOutcome> {
        let hits = self
            .edge_store
            .search(
                project_id,
                query_text,
                max_results,
                None,
                Some(self.min_confidence),
            )
            .await?;
        let hits = apply_confidence_floor(hits, self.min_confidence);

        if hits.is_empty() {
            info!(project_id, query_text, "Query matched no edges");
            return Ok(QueryOutcome::no_relevant_information());
        }

        let seed_keys: Vec<String> = hits
            .iter()
            .flat_map(|hit| [hit.from.clone(), hit.to.clone()])
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let neighborhood = self
            .graph_store
            .fetch_neighborhood(project_id, &seed_keys, self.context_hops)
            .await?;

        let answer_context = build_context(&hits, &neighborhood);
        let sources = hits
            .iter()
            .map(|hit| SourceCitation {
                edge_key: hit.edge_key.clone(),
                description: hit.embedding_text.clone(),
                confidence: hit.confidence,
                relevance_score: hit.score,
            })
            .collect();

        Ok(QueryOutcome {
            answer_context,
            sources,
            graph_paths: neighborhood.relations,
            no_results: false,
        })
    }
}

/// The vector index already filters by confidence; this guards against a
/// collaborator that ignores the range filter.
pub fn apply_confidence_floor(hits: Vec<EdgeHit>, floor: f64) -> Vec<EdgeHit> {
    hits.into_iter().filter(|h| h.confidence >= floor).collect()
}

/// One context block per matching edge, followed by the surrounding
/// neighborhood, formatted for the answer-generation collaborator.
pub fn build_context(hits: &[EdgeHit], neighborhood: &Neighborhood) -> String {
    let mut context = String::from("RELEVANT RELATIONSHIPS:\n");

    for (i, hit) in hits.iter().enumerate() {
        context.push_str(&format!(
            "[{}] {} (type: {}, confidence: {:.2})\n",
            i + 1,
            hit.embedding_text,
            hit.rel_type,
            hit.confidence
        ));
        if let Some(attrs) = hit.attributes.as_object() {
            if !attrs.is_empty() {
                let rendered: Vec<String> =
                    attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                context.push_str(&format!("    attributes: {}\n", rendered.join(", ")));
            }
        }
    }

    if !neighborhood.entities.is_empty() {
        context.push_str("\nCONNECTED EQUIPMENT:\n");
        for entity in neighborhood.entities.iter().take(20) {
            context.push_str(&format!(
                "- {} ({}, confidence {:.2})\n",
                entity.name, entity.entity_type, entity.confidence
            ));
        }
    }

    if !neighborhood.relations.is_empty() {
        context.push_str("\nGRAPH PATHS:\n");
        for rel in neighborhood.relations.iter().take(30) {
            context.push_str(&format!("- {} -{}-> {}", rel.from, rel.rel_type, rel.to));
            if let Some(warning) = &rel.validation_warning {
                context.push_str(&format!(" [warning: {warning}]"));
            }
            context.push('\n');
        }
    }

    context
}
