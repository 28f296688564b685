use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::ontology::VoltageClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(skip_deserializing)]
    pub voltage_class: Option<VoltageClass>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(skip_deserializing)]
    pub validation_warning: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

/// Raw shape the model is asked to produce.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// Validated extraction for one section. `error` is set instead of
/// returning Err for structural failures (unparsable model output); the
/// caller treats those as skippable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionOutcome {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub error: Option<String>,
}

impl ExtractionOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            entities: Vec::new(),
            relationships: Vec::new(),
            error: Some(error.into()),
        }
    }
}
