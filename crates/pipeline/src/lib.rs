pub mod cancel;
pub mod config;
pub mod ingestion;
pub mod query;
pub mod retry;
pub mod sync;

pub use cancel::{CancellationToken, ProgressCallback, ProgressReporter};
pub use config::AppConfig;
pub use ingestion::{
    IngestPhase, IngestStats, IngestionOrchestrator, LiveSectionProcessor, SectionProcessor,
};
pub use query::{QueryOrchestrator, QueryOutcome, SourceCitation};
pub use retry::RetryPolicy;
pub use sync::{BackgroundSyncService, SyncFn, SyncState, SyncSummary};

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use extract::{GraphExtractor, LlmClient};
use graph::GraphStore;
use guides::{ExtractionGuide, GuideExecutor, GuideReport};
use ingest::{HierarchyExtractor, SectionSummarizer};
use vectors::{EdgeVectorStore, EmbeddingClient, SummaryIndex};

/// Composition root. Every client is constructed here from the config
/// and injected into the components; nothing reaches for globals.
pub struct Pipeline {
    config: AppConfig,
    llm: LlmClient,
    graph_store: Arc<GraphStore>,
    edge_store: Arc<EdgeVectorStore>,
    summary_index: Arc<SummaryIndex>,
    ingestion: IngestionOrchestrator,
    query: QueryOrchestrator,
    sync: BackgroundSyncService,
}

impl Pipeline {
    /// Connect to the graph store and assemble the full pipeline.
    pub async fn connect(config: AppConfig, sync_state_path: PathBuf) -> Result<Self> {
        let graph = neo4rs::Graph::new(
            &config.graph.uri,
            &config.graph.user,
            &config.graph.password,
        )
        .await
        .context("Failed to connect to graph store")?;

        let graph_store = Arc::new(GraphStore::new(graph));
        graph_store.init_schema().await?;

        let embedding_client = EmbeddingClient::new(
            config.embedding.base_url.clone(),
            config.embedding.model.clone(),
        );
        let edge_store = Arc::new(EdgeVectorStore::new(
            config.vectors.base_url.clone(),
            embedding_client.clone(),
            config.vectors.batch_size,
        ));
        let summary_index = Arc::new(SummaryIndex::new(
            config.vectors.base_url.clone(),
            embedding_client,
        ));

        let llm = LlmClient::new(
            config.llm.base_url.clone(),
            config.llm.model.clone(),
            config.llm.temperature,
            config.llm.max_tokens,
        );
        let summarizer =
            SectionSummarizer::new(config.llm.base_url.clone(), config.llm.model.clone());
        let extractor = GraphExtractor::new(llm.clone());

        let processor = Arc::new(LiveSectionProcessor::new(
            summarizer,
            extractor,
            graph_store.clone(),
            edge_store.clone(),
            summary_index.clone(),
        ));
        let ingestion = IngestionOrchestrator::new(processor);

        let query = QueryOrchestrator::new(
            edge_store.clone(),
            graph_store.clone(),
            config.vectors.min_confidence,
            config.vectors.context_hops,
        );

        let sync = BackgroundSyncService::new(
            sync_state_path,
            &config.concurrency,
            &config.retry,
        );
        sync.load_state().await?;

        Ok(Self {
            config,
            llm,
            graph_store,
            edge_store,
            summary_index,
            ingestion,
            query,
            sync,
        })
    }

    /// Ingest one document and, when ingestion completes, run the
    /// project's extraction guides against it.
    pub async fn ingest_document(
        &self,
        project_id: &str,
        filename: &str,
        text: &str,
        extraction_guides: &[ExtractionGuide],
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<(IngestStats, Option<GuideReport>)> {
        let stats = self
            .ingestion
            .ingest_document(project_id, filename, text, cancel, progress)
            .await;

        if stats.status != IngestPhase::Complete || extraction_guides.is_empty() {
            return Ok((stats, None));
        }

        // Guide search runs over the freshly indexed summaries but
        // extracts from the full section text, so re-derive the tree.
        let sections = HierarchyExtractor::new().extract(&stats.document_id, text);
        let executor = GuideExecutor::new(
            &self.llm,
            &self.summary_index,
            &self.graph_store,
            self.config.guides.candidate_sections,
            self.config.guides.score_threshold,
        );
        let report = executor
            .execute_all(project_id, &stats.document_id, &sections, extraction_guides)
            .await?;

        Ok((stats, Some(report)))
    }

    /// Ingest several documents for one project, sequentially. Each
    /// document gets its own stats report; cancellation also stops the
    /// batch between documents.
    pub async fn ingest_project(
        &self,
        project_id: &str,
        documents: &[(String, String)],
        extraction_guides: &[ExtractionGuide],
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<Vec<(IngestStats, Option<GuideReport>)>> {
        let mut results = Vec::with_capacity(documents.len());

        for (filename, text) in documents {
            if cancel.is_cancelled() {
                break;
            }
            let result = self
                .ingest_document(project_id, filename, text, extraction_guides, cancel, progress)
                .await?;
            results.push(result);
        }

        Ok(results)
    }

    pub async fn query(
        &self,
        project_id: &str,
        query_text: &str,
        max_results: usize,
    ) -> Result<QueryOutcome> {
        self.query.query(project_id, query_text, max_results).await
    }

    /// Tear down a project everywhere: graph nodes, edge vectors, and
    /// section summaries. Partial failures are collected so the caller
    /// can retry the stores that did not clean up.
    pub async fn teardown_project(&self, project_id: &str) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.graph_store.teardown_project(project_id).await {
            errors.push(format!("graph: {e}"));
        }
        if let Err(e) = self.edge_store.delete_collection(project_id).await {
            errors.push(format!("edge vectors: {e}"));
        }
        if let Err(e) = self.summary_index.delete_collection(project_id).await {
            errors.push(format!("summaries: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("project teardown incomplete: {}", errors.join("; "))
        }
    }

    pub fn sync_service(&self) -> &BackgroundSyncService {
        &self.sync
    }

    pub fn graph_store(&self) -> &Arc<GraphStore> {
        &self.graph_store
    }

    pub fn edge_store(&self) -> &Arc<EdgeVectorStore> {
        &self.edge_store
    }
}
