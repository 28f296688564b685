use std::collections::HashMap;
use tracing::warn;

use crate::ontology::{
    self, SCALE_SENSITIVE_TYPES, TypeNormalizer, VoltageClass, scales_compatible,
};
use crate::schema::{Entity, RawExtraction, Relationship};

pub const SCALE_WARNING: &str = "scale_incompatible";

/// Validation and enrichment pass over a raw extraction. Unknown entity
/// types and dangling or unknown-typed relationships are dropped with a
/// warning; scale incompatibility is advisory only.
pub struct ExtractionValidator {
    normalizer: TypeNormalizer,
}

impl ExtractionValidator {
    pub fn new() -> Self {
        Self {
            normalizer: TypeNormalizer::new(),
        }
    }

    pub fn validate(&self, raw: RawExtraction) -> (Vec<Entity>, Vec<Relationship>) {
        let entities = self.validate_entities(raw.entities);

        let classes: HashMap<String, Option<VoltageClass>> = entities
            .iter()
            .map(|e| (e.id.clone(), e.voltage_class))
            .collect();

        let relationships = self.validate_relationships(raw.relationships, &classes);
        (entities, relationships)
    }

    fn validate_entities(&self, raw: Vec<Entity>) -> Vec<Entity> {
        let mut entities = Vec::with_capacity(raw.len());

        for mut entity in raw {
            let Some(canonical) = self.normalizer.entity_type(&entity.entity_type) else {
                warn!(
                    entity_id = %entity.id,
                    entity_type = %entity.entity_type,
                    "Dropping entity with unrecognized type"
                );
                continue;
            };

            entity.entity_type = canonical.to_string();
            entity.voltage_class = ontology::infer_voltage_class(&entity.attributes);
            entity.confidence = entity.confidence.clamp(0.0, 1.0);
            entities.push(entity);
        }

        entities
    }

    fn validate_relationships(
        &self,
        raw: Vec<Relationship>,
        classes: &HashMap<String, Option<VoltageClass>>,
    ) -> Vec<Relationship> {
        let mut relationships = Vec::with_capacity(raw.len());

        for mut rel in raw {
            if !classes.contains_key(&rel.from) || !classes.contains_key(&rel.to) {
                warn!(
                    from = %rel.from,
                    to = %rel.to,
                    rel_type = %rel.rel_type,
                    "Dropping relationship with missing endpoint"
                );
                continue;
            }

            let Some(canonical) = self.normalizer.relationship_type(&rel.rel_type) else {
                warn!(
                    from = %rel.from,
                    to = %rel.to,
                    rel_type = %rel.rel_type,
                    "Dropping relationship with unrecognized type"
                );
                continue;
            };
            rel.rel_type = canonical.to_string();
            rel.confidence = rel.confidence.clamp(0.0, 1.0);

            // Advisory only: annotate, never drop.
            if SCALE_SENSITIVE_TYPES.contains(&rel.rel_type.as_str()) {
                if let (Some(Some(a)), Some(Some(b))) =
                    (classes.get(&rel.from), classes.get(&rel.to))
                {
                    if !scales_compatible(*a, *b) {
                        rel.validation_warning = Some(SCALE_WARNING.to_string());
                    }
                }
            }

            relationships.push(rel);
        }

        relationships
    }
}

impl Default for ExtractionValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn entity(id: &str, entity_type: &str, confidence: f64) -> Entity {
        Entity {
            id: id.to_string(),
            name: id.to_string(),
            entity_type: entity_type.to_string(),
            attributes: HashMap::new(),
            confidence,
            voltage_class: None,
        }
    }

    fn relationship(from: &str, to: &str, rel_type: &str) -> Relationship {
        Relationship {
            from: from.to_string(),
            to: to.to_string(),
            rel_type: rel_type.to_string(),
            attributes: HashMap::new(),
            confidence: 0.8,
            validation_warning: None,
        }
    }

    #[test]
    fn test_unknown_entity_types_are_dropped() {
        let validator = ExtractionValidator::new();
        let raw = RawExtraction {
            entities: vec![entity("TR_1", "transformer", 0.9), entity("X_1", "gizmo", 0.9)],
            relationships: vec![],
        };

        let (entities, _) = validator.validate(raw);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "Transformer");
    }

    #[test]
    fn test_dangling_relationships_are_dropped() {
        let validator = ExtractionValidator::new();
        let raw = RawExtraction {
            entities: vec![entity("TR_1", "Transformer", 0.9)],
            relationships: vec![relationship("TR_1", "GHOST", "feeds")],
        };

        let (_, relationships) = validator.validate(raw);
        assert!(relationships.is_empty());
    }

    #[test]
    fn test_unknown_relationship_types_are_dropped() {
        let validator = ExtractionValidator::new();
        let raw = RawExtraction {
            entities: vec![
                entity("TR_1", "Transformer", 0.9),
                entity("CB_1", "CircuitBreaker", 0.9),
            ],
            relationships: vec![relationship("CB_1", "TR_1", "admires")],
        };

        let (_, relationships) = validator.validate(raw);
        assert!(relationships.is_empty());
    }

    #[test]
    fn test_scale_incompatibility_is_annotated_not_dropped() {
        let validator = ExtractionValidator::new();

        let mut low = entity("LV_PANEL", "Switchgear", 0.9);
        low.attributes
            .insert("rated_voltage".to_string(), json!("400 V"));
        let mut high = entity("LINE_1", "TransmissionLine", 0.9);
        high.attributes
            .insert("rated_voltage".to_string(), json!("110 kV"));

        let raw = RawExtraction {
            entities: vec![low, high],
            relationships: vec![relationship("LV_PANEL", "LINE_1", "feeds")],
        };

        let (_, relationships) = validator.validate(raw);

        assert_eq!(relationships.len(), 1);
        assert_eq!(
            relationships[0].validation_warning.as_deref(),
            Some(SCALE_WARNING)
        );
    }

    #[test]
    fn test_scale_check_skipped_for_non_power_relationships() {
        let validator = ExtractionValidator::new();

        let mut low = entity("METER_1", "Meter", 0.9);
        low.attributes
            .insert("rated_voltage".to_string(), json!("230 V"));
        let mut high = entity("LINE_1", "TransmissionLine", 0.9);
        high.attributes
            .insert("rated_voltage".to_string(), json!("220 kV"));

        let raw = RawExtraction {
            entities: vec![low, high],
            relationships: vec![relationship("METER_1", "LINE_1", "measures")],
        };

        let (_, relationships) = validator.validate(raw);
        assert!(relationships[0].validation_warning.is_none());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let validator = ExtractionValidator::new();
        let raw = RawExtraction {
            entities: vec![entity("TR_1", "Transformer", 1.7), entity("TR_2", "Transformer", -0.2)],
            relationships: vec![],
        };

        let (entities, _) = validator.validate(raw);

        assert_eq!(entities[0].confidence, 1.0);
        assert_eq!(entities[1].confidence, 0.0);
    }

    #[test]
    fn test_voltage_class_is_attached() {
        let validator = ExtractionValidator::new();

        let mut tr = entity("TR_1", "Transformer", 0.9);
        tr.attributes
            .insert("rated_voltage".to_string(), json!("11 kV"));

        let raw = RawExtraction {
            entities: vec![tr],
            relationships: vec![],
        };

        let (entities, _) = validator.validate(raw);
        assert_eq!(entities[0].voltage_class, Some(VoltageClass::Medium));
    }
}
