pub mod llm;
pub mod ontology;
pub mod prompt;
pub mod schema;
pub mod validator;

pub use llm::{LlmClient, extract_json_object};
pub use ontology::VoltageClass;
pub use schema::{Entity, ExtractionOutcome, RawExtraction, Relationship};
pub use validator::ExtractionValidator;

use anyhow::Result;
use tracing::warn;

/// Guided entity/relationship extraction for one section.
pub struct GraphExtractor {
    llm_client: LlmClient,
    validator: ExtractionValidator,
}

impl GraphExtractor {
    pub fn new(llm_client: LlmClient) -> Self {
        Self {
            llm_client,
            validator: ExtractionValidator::new(),
        }
    }

    /// Ask the model for entities and relationships in a section, then
    /// run the validation pass. An unparsable response is a structural
    /// failure: the outcome carries empty lists plus an error string and
    /// the caller skips the section. Only transport-level failures
    /// propagate as Err.
    pub async fn extract(
        &self,
        section_title: &str,
        section_content: &str,
        project_id: &str,
        document_hash: &str,
    ) -> Result<ExtractionOutcome> {
        let user_prompt = prompt::build_extraction_prompt(section_title, section_content);

        let response = self
            .llm_client
            .generate(prompt::EXTRACTION_SYSTEM_PROMPT, &user_prompt)
            .await?;

        let Some(json_str) = extract_json_object(&response) else {
            warn!(
                project_id,
                document_hash,
                section_title,
                "No JSON object found in extraction response"
            );
            return Ok(ExtractionOutcome::failed(format!(
                "no JSON object in extraction response for section '{}'",
                section_title
            )));
        };

        let raw: RawExtraction = match serde_json::from_str(json_str) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    project_id,
                    document_hash,
                    section_title,
                    error = %e,
                    "Extraction response did not match the schema"
                );
                return Ok(ExtractionOutcome::failed(format!(
                    "malformed extraction for section '{}': {}",
                    section_title, e
                )));
            }
        };

        let (entities, relationships) = self.validator.validate(raw);

        Ok(ExtractionOutcome {
            entities,
            relationships,
            error: None,
        })
    }
}
