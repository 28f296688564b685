use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use extract::{Entity, GraphExtractor, Relationship};
use graph::{GraphStore, StoreReport};
use ingest::{Document, HierarchyExtractor, Section, SectionSummarizer, SectionSummary};
use vectors::{EdgeEmbeddingJob, EdgeVectorStore, SummaryIndex};

use crate::cancel::{CancellationToken, ProgressReporter};

/// Phases of the per-document state machine. `Cancelled` is a terminal
/// status, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestPhase {
    Parsing,
    Extracting,
    Storing,
    VectorIndexing,
    Complete,
    Cancelled,
    Failed,
}

/// Final statistics for one ingestion run. Always returned, even for
/// cancelled or failed runs; `errors` enumerates every dropped or failed
/// item.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStats {
    pub run_id: Uuid,
    pub project_id: String,
    pub document_id: String,
    pub status: IngestPhase,
    pub sections_total: usize,
    pub sections_processed: usize,
    pub entities_created: usize,
    pub entities_updated: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    pub vectors_stored: usize,
    pub elapsed_ms: u64,
    pub errors: Vec<String>,
}

/// Everything produced for one section before storage.
#[derive(Debug, Clone)]
pub struct SectionExtraction {
    pub section_id: String,
    pub section_title: String,
    pub source_path: String,
    pub summary: Option<SectionSummary>,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub vectors_stored: usize,
    pub errors: Vec<String>,
}

/// The per-section work of the pipeline, split by phase so the
/// orchestrator can drive the state machine and so tests can substitute
/// a stub for the external collaborators.
#[async_trait]
pub trait SectionProcessor: Send + Sync {
    async fn begin_document(&self, project_id: &str, document: &Document) -> Result<()>;

    /// Summarize and extract one section. Structural failures are
    /// recorded inside the returned extraction, not raised.
    async fn extract_section(
        &self,
        project_id: &str,
        document: &Document,
        section: &Section,
        source_path: &str,
    ) -> Result<SectionExtraction>;

    async fn store_section(
        &self,
        project_id: &str,
        document: &Document,
        extraction: &SectionExtraction,
    ) -> Result<StoreReport>;

    async fn index_section(
        &self,
        project_id: &str,
        extraction: &SectionExtraction,
    ) -> Result<IndexReport>;

    async fn finalize_document(
        &self,
        project_id: &str,
        document: &Document,
        stats: &IngestStats,
    ) -> Result<()>;
}

/// Drives the end-to-end pipeline over one document's sections,
/// aggregates statistics, and honors cancellation at section boundaries.
pub struct IngestionOrchestrator {
    processor: Arc<dyn SectionProcessor>,
    hierarchy: HierarchyExtractor,
}

impl IngestionOrchestrator {
    pub fn new(processor: Arc<dyn SectionProcessor>) -> Self {
        Self {
            processor,
            hierarchy: HierarchyExtractor::new(),
        }
    }

    /// Ingest one document. Never raises on partial data loss: the
    /// returned stats carry the terminal status and the accumulated
    /// error list.
    pub async fn ingest_document(
        &self,
        project_id: &str,
        filename: &str,
        text: &str,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> IngestStats {
        let started = Instant::now();
        let document = Document::new(project_id, filename, text);

        progress.report(0.0, "parsing sections", IngestPhase::Parsing);
        let sections = self.hierarchy.extract(&document.id, text);

        let mut stats = IngestStats {
            run_id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            document_id: document.id.clone(),
            status: IngestPhase::Parsing,
            sections_total: sections.len(),
            sections_processed: 0,
            entities_created: 0,
            entities_updated: 0,
            relationships_created: 0,
            relationships_updated: 0,
            vectors_stored: 0,
            elapsed_ms: 0,
            errors: Vec::new(),
        };

        // A begin failure is outside any per-section scope: the run is
        // Failed, not partially complete.
        if let Err(e) = self.processor.begin_document(project_id, &document).await {
            stats.status = IngestPhase::Failed;
            stats.errors.push(format!("begin document: {e}"));
            stats.elapsed_ms = started.elapsed().as_millis() as u64;
            return stats;
        }

        let total = sections.len().max(1) as f32;
        let mut cancelled = false;

        for (idx, section) in sections.iter().enumerate() {
            // Cancellation is polled once per section, never mid-section.
            if cancel.is_cancelled() {
                info!(
                    run_id = %stats.run_id,
                    sections_processed = stats.sections_processed,
                    "Ingestion cancelled at section boundary"
                );
                cancelled = true;
                break;
            }

            let source_path = section.path(&sections);
            let percent = 5.0 + (idx as f32 / total) * 90.0;
            progress.report(
                percent,
                &format!("processing section '{}'", section.title),
                IngestPhase::Extracting,
            );

            stats.status = IngestPhase::Extracting;
            let extraction = match self
                .processor
                .extract_section(project_id, &document, section, &source_path)
                .await
            {
                Ok(extraction) => extraction,
                Err(e) => {
                    warn!(section = %section.title, error = %e, "Section extraction failed");
                    stats
                        .errors
                        .push(format!("section '{}': {e}", section.title));
                    stats.sections_processed += 1;
                    continue;
                }
            };
            stats.errors.extend(extraction.errors.iter().cloned());

            stats.status = IngestPhase::Storing;
            match self
                .processor
                .store_section(project_id, &document, &extraction)
                .await
            {
                Ok(report) => {
                    stats.entities_created += report.nodes_created;
                    stats.entities_updated += report.nodes_updated;
                    stats.relationships_created += report.edges_created;
                    stats.relationships_updated += report.edges_updated;
                    stats.errors.extend(report.errors);

                    stats.status = IngestPhase::VectorIndexing;
                    match self.processor.index_section(project_id, &extraction).await {
                        Ok(index_report) => {
                            stats.vectors_stored += index_report.vectors_stored;
                            stats.errors.extend(index_report.errors);
                        }
                        Err(e) => {
                            warn!(section = %section.title, error = %e, "Section indexing failed");
                            stats
                                .errors
                                .push(format!("index section '{}': {e}", section.title));
                        }
                    }
                }
                Err(e) => {
                    warn!(section = %section.title, error = %e, "Section storage failed");
                    stats
                        .errors
                        .push(format!("store section '{}': {e}", section.title));
                }
            }

            stats.sections_processed += 1;
        }

        if cancelled {
            stats.status = IngestPhase::Cancelled;
            progress.report(100.0, "ingestion cancelled", IngestPhase::Cancelled);
        } else {
            match self
                .processor
                .finalize_document(project_id, &document, &stats)
                .await
            {
                Ok(()) => {
                    stats.status = IngestPhase::Complete;
                    progress.report(100.0, "ingestion complete", IngestPhase::Complete);
                }
                Err(e) => {
                    stats.status = IngestPhase::Failed;
                    stats.errors.push(format!("finalize document: {e}"));
                    progress.report(100.0, "ingestion failed", IngestPhase::Failed);
                }
            }
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %stats.run_id,
            status = ?stats.status,
            sections_processed = stats.sections_processed,
            entities_created = stats.entities_created,
            relationships_created = stats.relationships_created,
            vectors_stored = stats.vectors_stored,
            errors = stats.errors.len(),
            "Ingestion finished"
        );

        stats
    }
}

/// Production processor wiring the real collaborators together.
pub struct LiveSectionProcessor {
    summarizer: SectionSummarizer,
    extractor: GraphExtractor,
    graph_store: Arc<GraphStore>,
    edge_store: Arc<EdgeVectorStore>,
    summary_index: Arc<SummaryIndex>,
}

impl LiveSectionProcessor {
    pub fn new(
        summarizer: SectionSummarizer,
        extractor: GraphExtractor,
        graph_store: Arc<GraphStore>,
        edge_store: Arc<EdgeVectorStore>,
        summary_index: Arc<SummaryIndex>,
    ) -> Self {
        Self {
            summarizer,
            extractor,
            graph_store,
            edge_store,
            summary_index,
        }
    }
}

#[async_trait]
impl SectionProcessor for LiveSectionProcessor {
    async fn begin_document(&self, _project_id: &str, document: &Document) -> Result<()> {
        self.graph_store.merge_document(document).await
    }

    async fn extract_section(
        &self,
        project_id: &str,
        document: &Document,
        section: &Section,
        source_path: &str,
    ) -> Result<SectionExtraction> {
        let mut extraction = SectionExtraction {
            section_id: section.section_id.clone(),
            section_title: section.title.clone(),
            source_path: source_path.to_string(),
            summary: None,
            entities: Vec::new(),
            relationships: Vec::new(),
            errors: Vec::new(),
        };

        // A summarizer transport failure degrades to the heuristic
        // summary; the section still gets indexed for guide search.
        extraction.summary = match self.summarizer.summarize(section).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                extraction
                    .errors
                    .push(format!("summarize '{}': {e}", section.title));
                Some(ingest::summarizer::fallback_summary(section))
            }
        };

        match self
            .extractor
            .extract(
                &section.title,
                &section.content,
                project_id,
                &document.content_hash,
            )
            .await
        {
            Ok(outcome) => {
                if let Some(error) = outcome.error {
                    extraction.errors.push(error);
                }
                extraction.entities = outcome.entities;
                extraction.relationships = outcome.relationships;
            }
            Err(e) => {
                extraction
                    .errors
                    .push(format!("extract '{}': {e}", section.title));
            }
        }

        Ok(extraction)
    }

    async fn store_section(
        &self,
        project_id: &str,
        document: &Document,
        extraction: &SectionExtraction,
    ) -> Result<StoreReport> {
        self.graph_store
            .store_extraction(
                project_id,
                &document.id,
                &extraction.entities,
                &extraction.relationships,
                &extraction.source_path,
            )
            .await
    }

    async fn index_section(
        &self,
        project_id: &str,
        extraction: &SectionExtraction,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        if let Some(summary) = &extraction.summary {
            if let Err(e) = self.summary_index.store_summary(project_id, summary).await {
                report
                    .errors
                    .push(format!("summary '{}': {e}", extraction.section_title));
            }
        }

        if extraction.relationships.is_empty() {
            return Ok(report);
        }

        let jobs: Vec<EdgeEmbeddingJob> = extraction
            .relationships
            .iter()
            .map(|rel| edge_embedding_job(rel, &extraction.entities))
            .collect();

        report.vectors_stored = self
            .edge_store
            .store_edge_embeddings(project_id, &jobs)
            .await?;

        Ok(report)
    }

    async fn finalize_document(
        &self,
        project_id: &str,
        document: &Document,
        stats: &IngestStats,
    ) -> Result<()> {
        self.graph_store
            .update_document_metadata(
                project_id,
                &document.id,
                stats.entities_created + stats.entities_updated,
                stats.relationships_created + stats.relationships_updated,
            )
            .await
    }
}

/// Build the embedding job for one relationship, describing the edge
/// with entity names rather than raw keys.
pub fn edge_embedding_job(rel: &Relationship, entities: &[Entity]) -> EdgeEmbeddingJob {
    let name_of = |key: &str| {
        entities
            .iter()
            .find(|e| e.id == key)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| key.to_string())
    };

    let embedding_text = format!(
        "{} {} {}",
        name_of(&rel.from),
        rel.rel_type.replace('_', " "),
        name_of(&rel.to)
    );

    let mut attributes = rel.attributes.clone();
    if let Some(warning) = &rel.validation_warning {
        attributes.insert(
            "validation_warning".to_string(),
            serde_json::Value::String(warning.clone()),
        );
    }

    EdgeEmbeddingJob {
        from: rel.from.clone(),
        rel_type: rel.rel_type.clone(),
        to: rel.to.clone(),
        confidence: rel.confidence,
        embedding_text,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const THREE_SECTIONS: &str = "# Alpha\nalpha text\n# Beta\nbeta text\n# Gamma\ngamma text\n";
    const FIVE_SECTIONS: &str =
        "# S1\nt1\n# S2\nt2\n# S3\nt3\n# S4\nt4\n# S5\nt5\n";

    fn entity(id: &str) -> Entity {
        Entity {
            id: id.to_string(),
            name: id.to_string(),
            entity_type: "Transformer".to_string(),
            attributes: HashMap::new(),
            confidence: 0.9,
            voltage_class: None,
        }
    }

    fn relationship(from: &str, to: &str) -> Relationship {
        Relationship {
            from: from.to_string(),
            to: to.to_string(),
            rel_type: "feeds".to_string(),
            attributes: HashMap::new(),
            confidence: 0.8,
            validation_warning: None,
        }
    }

    /// Stub yielding two entities and one relationship per section.
    struct StubProcessor {
        extract_calls: AtomicUsize,
        fail_store_for: Option<String>,
        fail_begin: bool,
        cancel_during_section: Option<(usize, CancellationToken)>,
    }

    impl StubProcessor {
        fn new() -> Self {
            Self {
                extract_calls: AtomicUsize::new(0),
                fail_store_for: None,
                fail_begin: false,
                cancel_during_section: None,
            }
        }
    }

    #[async_trait]
    impl SectionProcessor for StubProcessor {
        async fn begin_document(&self, _project_id: &str, _document: &Document) -> Result<()> {
            if self.fail_begin {
                anyhow::bail!("graph store unavailable");
            }
            Ok(())
        }

        async fn extract_section(
            &self,
            _project_id: &str,
            _document: &Document,
            section: &Section,
            source_path: &str,
        ) -> Result<SectionExtraction> {
            let call = self.extract_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, token)) = &self.cancel_during_section {
                if call == *at {
                    // Simulates a client disconnect arriving while this
                    // section is in flight.
                    token.cancel();
                }
            }

            let a = format!("{}_A", section.title);
            let b = format!("{}_B", section.title);
            Ok(SectionExtraction {
                section_id: section.section_id.clone(),
                section_title: section.title.clone(),
                source_path: source_path.to_string(),
                summary: None,
                entities: vec![entity(&a), entity(&b)],
                relationships: vec![relationship(&a, &b)],
                errors: Vec::new(),
            })
        }

        async fn store_section(
            &self,
            _project_id: &str,
            _document: &Document,
            extraction: &SectionExtraction,
        ) -> Result<StoreReport> {
            if let Some(title) = &self.fail_store_for {
                if &extraction.section_title == title {
                    anyhow::bail!("bolt connection reset");
                }
            }
            Ok(StoreReport {
                nodes_created: extraction.entities.len(),
                nodes_updated: 0,
                edges_created: extraction.relationships.len(),
                edges_updated: 0,
                errors: Vec::new(),
            })
        }

        async fn index_section(
            &self,
            _project_id: &str,
            extraction: &SectionExtraction,
        ) -> Result<IndexReport> {
            Ok(IndexReport {
                vectors_stored: extraction.relationships.len(),
                errors: Vec::new(),
            })
        }

        async fn finalize_document(
            &self,
            _project_id: &str,
            _document: &Document,
            _stats: &IngestStats,
        ) -> Result<()> {
            Ok(())
        }
    }

    /// Stub with merge semantics: entity and edge keys already seen for
    /// the project count as updates, mirroring the graph store's MERGE
    /// created-vs-updated detection.
    struct MergingProcessor {
        entities: Mutex<HashSet<(String, String)>>,
        edges: Mutex<HashSet<(String, String, String, String)>>,
    }

    impl MergingProcessor {
        fn new() -> Self {
            Self {
                entities: Mutex::new(HashSet::new()),
                edges: Mutex::new(HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl SectionProcessor for MergingProcessor {
        async fn begin_document(&self, _project_id: &str, _document: &Document) -> Result<()> {
            Ok(())
        }

        async fn extract_section(
            &self,
            _project_id: &str,
            _document: &Document,
            section: &Section,
            source_path: &str,
        ) -> Result<SectionExtraction> {
            let a = format!("{}_A", section.title);
            let b = format!("{}_B", section.title);
            Ok(SectionExtraction {
                section_id: section.section_id.clone(),
                section_title: section.title.clone(),
                source_path: source_path.to_string(),
                summary: None,
                entities: vec![entity(&a), entity(&b)],
                relationships: vec![relationship(&a, &b)],
                errors: Vec::new(),
            })
        }

        async fn store_section(
            &self,
            project_id: &str,
            _document: &Document,
            extraction: &SectionExtraction,
        ) -> Result<StoreReport> {
            let mut report = StoreReport::default();

            let mut entities = self.entities.lock().unwrap();
            for e in &extraction.entities {
                if entities.insert((project_id.to_string(), e.id.clone())) {
                    report.nodes_created += 1;
                } else {
                    report.nodes_updated += 1;
                }
            }

            let mut edges = self.edges.lock().unwrap();
            for r in &extraction.relationships {
                let key = (
                    project_id.to_string(),
                    r.from.clone(),
                    r.rel_type.clone(),
                    r.to.clone(),
                );
                if edges.insert(key) {
                    report.edges_created += 1;
                } else {
                    report.edges_updated += 1;
                }
            }

            Ok(report)
        }

        async fn index_section(
            &self,
            _project_id: &str,
            _extraction: &SectionExtraction,
        ) -> Result<IndexReport> {
            Ok(IndexReport::default())
        }

        async fn finalize_document(
            &self,
            _project_id: &str,
            _document: &Document,
            _stats: &IngestStats,
        ) -> Result<()> {
            Ok(())
        }
    }

    async fn run(
        processor: StubProcessor,
        text: &str,
        cancel: &CancellationToken,
    ) -> (IngestStats, usize) {
        let processor = Arc::new(processor);
        let orchestrator = IngestionOrchestrator::new(processor.clone());
        let stats = orchestrator
            .ingest_document("proj", "doc.md", text, cancel, &ProgressReporter::disabled())
            .await;
        let calls = processor.extract_calls.load(Ordering::SeqCst);
        (stats, calls)
    }

    #[tokio::test]
    async fn test_three_section_document_completes_with_expected_counts() {
        let (stats, _) = run(StubProcessor::new(), THREE_SECTIONS, &CancellationToken::new()).await;

        assert_eq!(stats.status, IngestPhase::Complete);
        assert_eq!(stats.sections_total, 3);
        assert_eq!(stats.sections_processed, 3);
        assert_eq!(stats.entities_created, 6);
        assert_eq!(stats.relationships_created, 3);
        assert_eq!(stats.vectors_stored, 3);
        assert!(stats.errors.is_empty());
    }

    #[tokio::test]
    async fn test_reingesting_unchanged_document_updates_instead_of_creating() {
        let processor = Arc::new(MergingProcessor::new());
        let orchestrator = IngestionOrchestrator::new(processor.clone());
        let cancel = CancellationToken::new();
        let progress = ProgressReporter::disabled();

        let first = orchestrator
            .ingest_document("proj", "doc.md", THREE_SECTIONS, &cancel, &progress)
            .await;
        let second = orchestrator
            .ingest_document("proj", "doc.md", THREE_SECTIONS, &cancel, &progress)
            .await;

        assert_eq!(first.status, IngestPhase::Complete);
        assert_eq!(first.entities_created, 6);
        assert_eq!(first.relationships_created, 3);

        assert_eq!(second.status, IngestPhase::Complete);
        assert_eq!(second.entities_created, 0);
        assert_eq!(second.entities_updated, 6);
        assert_eq!(second.relationships_created, 0);
        assert_eq!(second.relationships_updated, 3);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_processes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (stats, calls) = run(StubProcessor::new(), THREE_SECTIONS, &cancel).await;

        assert_eq!(stats.status, IngestPhase::Cancelled);
        assert_eq!(stats.sections_processed, 0);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_cancel_after_second_section_stops_further_extraction() {
        let cancel = CancellationToken::new();
        let mut processor = StubProcessor::new();
        processor.cancel_during_section = Some((2, cancel.clone()));

        let (stats, calls) = run(processor, FIVE_SECTIONS, &cancel).await;

        assert_eq!(stats.status, IngestPhase::Cancelled);
        assert_eq!(stats.sections_processed, 2);
        // No extraction calls for sections 3-5.
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_recorded_and_processing_continues() {
        let mut processor = StubProcessor::new();
        processor.fail_store_for = Some("Beta".to_string());

        let (stats, _) = run(processor, THREE_SECTIONS, &CancellationToken::new()).await;

        assert_eq!(stats.status, IngestPhase::Complete);
        assert_eq!(stats.sections_processed, 3);
        // Beta's entities were never stored, Beta's edges never indexed.
        assert_eq!(stats.entities_created, 4);
        assert_eq!(stats.vectors_stored, 2);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].contains("Beta"));
    }

    #[tokio::test]
    async fn test_begin_failure_is_fatal() {
        let mut processor = StubProcessor::new();
        processor.fail_begin = true;

        let (stats, calls) = run(processor, THREE_SECTIONS, &CancellationToken::new()).await;

        assert_eq!(stats.status, IngestPhase::Failed);
        assert_eq!(stats.sections_processed, 0);
        assert_eq!(calls, 0);
        assert!(!stats.errors.is_empty());
    }

    #[tokio::test]
    async fn test_document_without_text_completes_empty() {
        let (stats, calls) = run(StubProcessor::new(), "", &CancellationToken::new()).await;

        assert_eq!(stats.status, IngestPhase::Complete);
        assert_eq!(stats.sections_total, 0);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_progress_reports_phases_in_order() {
        let phases: Arc<Mutex<Vec<IngestPhase>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        let reporter = ProgressReporter::new(Arc::new(move |_, _, phase| {
            sink.lock().unwrap().push(phase);
        }));

        let orchestrator = IngestionOrchestrator::new(Arc::new(StubProcessor::new()));
        let stats = orchestrator
            .ingest_document(
                "proj",
                "doc.md",
                THREE_SECTIONS,
                &CancellationToken::new(),
                &reporter,
            )
            .await;

        assert_eq!(stats.status, IngestPhase::Complete);
        let phases = phases.lock().unwrap();
        assert_eq!(phases.first(), Some(&IngestPhase::Parsing));
        assert_eq!(phases.last(), Some(&IngestPhase::Complete));
    }

    #[test]
    fn test_edge_embedding_job_uses_entity_names() {
        let mut from = entity("CB_1A");
        from.name = "Circuit Breaker 1A".to_string();
        let mut to = entity("TR_1");
        to.name = "Transformer 1".to_string();

        let mut rel = relationship("CB_1A", "TR_1");
        rel.rel_type = "protects".to_string();
        rel.validation_warning = Some("scale_incompatible".to_string());

        let job = edge_embedding_job(&rel, &[from, to]);

        assert_eq!(job.embedding_text, "Circuit Breaker 1A protects Transformer 1");
        assert_eq!(
            job.attributes["validation_warning"],
            serde_json::Value::String("scale_incompatible".to_string())
        );
    }
}
