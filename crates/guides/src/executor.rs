use anyhow::Result;
use tracing::{debug, info, warn};

use extract::{LlmClient, extract_json_object};
use graph::GraphStore;
use ingest::Section;
use vectors::{SummaryHit, SummaryIndex};

use crate::schema::{
    ActualValue, ExtractionGuide, GuideMiss, GuideOutcome, GuideReport, GuideResponse,
    NOT_FOUND_SENTINEL,
};

const GUIDE_SYSTEM_PROMPT: &str =
    "You extract one specific value from a document section. \
     Output only JSON with the requested shape.";

/// Runs project-defined extraction guides: guided semantic search for a
/// candidate section, one targeted LLM extraction, and persistence of
/// the value with provenance.
pub struct GuideExecutor<'a> {
    llm: &'a LlmClient,
    summary_index: &'a SummaryIndex,
    graph_store: &'a GraphStore,
    candidate_sections: usize,
    score_threshold: f32,
}

impl<'a> GuideExecutor<'a> {
    pub fn new(
        llm: &'a LlmClient,
        summary_index: &'a SummaryIndex,
        graph_store: &'a GraphStore,
        candidate_sections: usize,
        score_threshold: f32,
    ) -> Self {
        Self {
            llm,
            summary_index,
            graph_store,
            candidate_sections,
            score_threshold,
        }
    }

    /// Execute every guide against one document. A guide that finds
    /// nothing is a miss, not an error; only transport failures
    /// propagate.
    pub async fn execute_all(
        &self,
        project_id: &str,
        document_id: &str,
        sections: &[Section],
        guides: &[ExtractionGuide],
    ) -> Result<GuideReport> {
        let mut report = GuideReport::default();

        for guide in guides {
            let outcome = self
                .execute(project_id, document_id, sections, guide)
                .await?;
            if outcome.is_successful() {
                report.successful_extractions += 1;
            }
            report.outcomes.push(outcome);
        }

        info!(
            project_id,
            document_id,
            guides = guides.len(),
            successful = report.successful_extractions,
            "Guide execution finished"
        );

        Ok(report)
    }

    pub async fn execute(
        &self,
        project_id: &str,
        document_id: &str,
        sections: &[Section],
        guide: &ExtractionGuide,
    ) -> Result<GuideOutcome> {
        // The guide's instruction text doubles as the search query.
        let candidates = self
            .summary_index
            .search(
                project_id,
                &guide.instructions,
                self.candidate_sections,
                Some(self.score_threshold),
            )
            .await?;

        if candidates.is_empty() {
            debug!(field = %guide.field_name, "No candidate section above threshold");
            return Ok(GuideOutcome::miss(guide, GuideMiss::NoCandidateSection));
        }

        // Targeted extraction runs on the full section text, not the
        // summary the search matched against. Summaries from other
        // documents in the project may outrank this document's, so take
        // the best-scoring candidate that is actually one of ours.
        let Some(section) = select_section(&candidates, sections) else {
            warn!(
                field = %guide.field_name,
                "No candidate section belongs to this document"
            );
            return Ok(GuideOutcome::miss(guide, GuideMiss::SectionUnavailable));
        };

        let prompt = build_guide_prompt(guide, &section.title, &section.content);
        let response = self.llm.generate(GUIDE_SYSTEM_PROMPT, &prompt).await?;

        let Some(parsed) = parse_guide_response(&response) else {
            warn!(field = %guide.field_name, "Unparsable guide response");
            return Ok(GuideOutcome::miss(guide, GuideMiss::UnparsableResponse));
        };

        if parsed.value.trim() == NOT_FOUND_SENTINEL || parsed.value.trim().is_empty() {
            return Ok(GuideOutcome::miss(guide, GuideMiss::ValueNotFound));
        }

        let value = ActualValue {
            field_name: guide.field_name.clone(),
            category: guide.category.clone(),
            document_id: document_id.to_string(),
            project_id: project_id.to_string(),
            value: parsed.value.trim().to_string(),
            confidence: parsed.confidence.clamp(0.0, 1.0),
            source_section: section.title.clone(),
        };

        self.graph_store
            .store_actual_value(
                project_id,
                &value.category,
                &value.field_name,
                document_id,
                &value.value,
                value.confidence,
                &parsed.explanation,
                &value.source_section,
            )
            .await?;

        Ok(GuideOutcome::hit(value))
    }
}

pub fn build_guide_prompt(guide: &ExtractionGuide, section_title: &str, section_content: &str) -> String {
    let examples = if guide.examples.is_empty() {
        String::new()
    } else {
        format!("\nEXAMPLES OF VALID VALUES:\n- {}\n", guide.examples.join("\n- "))
    };

    format!(
        r#"Extract one specific value from the document section below.

FIELD: {field}
DEFINITION: {definition}
INSTRUCTIONS: {instructions}
{examples}
Return ONLY a JSON object:
{{
  "value": "the extracted value, or {sentinel} if the section does not state it",
  "confidence": 0.0,
  "explanation": "where in the section the value comes from"
}}

SECTION TITLE: {title}

SECTION TEXT:
{content}

JSON OUTPUT:"#,
        field = guide.field_name,
        definition = guide.definition,
        instructions = guide.instructions,
        examples = examples,
        sentinel = NOT_FOUND_SENTINEL,
        title = section_title,
        content = section_content,
    )
}

/// Highest-ranked candidate whose section is present in this document.
/// Candidates arrive ordered by score.
pub fn select_section<'s>(candidates: &[SummaryHit], sections: &'s [Section]) -> Option<&'s Section> {
    candidates
        .iter()
        .find_map(|hit| sections.iter().find(|s| s.section_id == hit.section_id))
}

pub fn parse_guide_response(response: &str) -> Option<GuideResponse> {
    let json_str = extract_json_object(response)?;
    serde_json::from_str(json_str).ok()
}
