use serde::{Deserialize, Serialize};

/// Sentinel value the model returns when the requested field is not
/// present in the candidate section.
pub const NOT_FOUND_SENTINEL: &str = "NOT_FOUND";

/// A project-level definition of one field to extract from any document
/// in the project. Independent of any single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionGuide {
    pub category: String,
    pub field_name: String,
    pub definition: String,
    pub instructions: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// The guide's extracted result for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActualValue {
    pub field_name: String,
    pub category: String,
    pub document_id: String,
    pub project_id: String,
    pub value: String,
    pub confidence: f64,
    pub source_section: String,
}

/// Structured response the guide prompt demands from the model.
#[derive(Debug, Clone, Deserialize)]
pub struct GuideResponse {
    pub value: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}

/// Why a guide execution produced no value. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuideMiss {
    /// No section scored above the search threshold.
    NoCandidateSection,
    /// No candidate section was among the document's sections.
    SectionUnavailable,
    /// The model answered with the not-found sentinel.
    ValueNotFound,
    /// The model response was not parsable as the required shape.
    UnparsableResponse,
}

/// Result of executing one guide against one document.
#[derive(Debug, Clone, Serialize)]
pub struct GuideOutcome {
    pub field_name: String,
    pub category: String,
    pub extracted: Option<ActualValue>,
    pub miss: Option<GuideMiss>,
}

impl GuideOutcome {
    pub fn hit(value: ActualValue) -> Self {
        Self {
            field_name: value.field_name.clone(),
            category: value.category.clone(),
            extracted: Some(value),
            miss: None,
        }
    }

    pub fn miss(guide: &ExtractionGuide, miss: GuideMiss) -> Self {
        Self {
            field_name: guide.field_name.clone(),
            category: guide.category.clone(),
            extracted: None,
            miss: Some(miss),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.extracted.is_some()
    }
}

/// Aggregate over all guides of a project for one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GuideReport {
    pub successful_extractions: usize,
    pub outcomes: Vec<GuideOutcome>,
}
