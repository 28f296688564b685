use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Closed set of entity types the extractor accepts.
pub const ENTITY_TYPES: &[&str] = &[
    "Transformer",
    "CircuitBreaker",
    "Busbar",
    "TransmissionLine",
    "Generator",
    "ProtectionRelay",
    "Substation",
    "Switchgear",
    "Capacitor",
    "Meter",
    "ControlSystem",
    "Feeder",
];

/// Closed set of relationship types.
pub const RELATIONSHIP_TYPES: &[&str] = &[
    "feeds",
    "protects",
    "connects_to",
    "part_of",
    "monitors",
    "controls",
    "located_in",
    "supplies",
    "switches",
    "measures",
];

/// Relationship types whose endpoints carry power and therefore get the
/// voltage-class compatibility check.
pub const SCALE_SENSITIVE_TYPES: &[&str] = &["feeds", "connects_to", "supplies"];

const LOW_VOLTAGE_MAX: f64 = 1_000.0;
const HIGH_VOLTAGE_MIN: f64 = 35_000.0;

/// Attribute names the extractor probes for a rated voltage, in order.
const VOLTAGE_ATTRIBUTES: &[&str] = &["rated_voltage", "voltage", "nominal_voltage"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoltageClass {
    Low,
    Medium,
    High,
}

impl VoltageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoltageClass::Low => "low",
            VoltageClass::Medium => "medium",
            VoltageClass::High => "high",
        }
    }
}

/// Classify a rated voltage in volts.
pub fn classify_voltage(volts: f64) -> VoltageClass {
    if volts < LOW_VOLTAGE_MAX {
        VoltageClass::Low
    } else if volts >= HIGH_VOLTAGE_MIN {
        VoltageClass::High
    } else {
        VoltageClass::Medium
    }
}

/// Pull a numeric rated-voltage out of an attribute map, tolerating
/// numbers, numeric strings, and "kV"/"V" suffixed strings.
pub fn infer_voltage_class(attributes: &HashMap<String, Value>) -> Option<VoltageClass> {
    for key in VOLTAGE_ATTRIBUTES {
        if let Some(value) = attributes.get(*key) {
            if let Some(volts) = parse_volts(value) {
                return Some(classify_voltage(volts));
            }
        }
    }
    None
}

fn parse_volts(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let lower = s.trim().to_lowercase();
            let (numeric, multiplier) = if let Some(stripped) = lower.strip_suffix("kv") {
                (stripped.trim(), 1_000.0)
            } else if let Some(stripped) = lower.strip_suffix('v') {
                (stripped.trim(), 1.0)
            } else {
                (lower.as_str(), 1.0)
            };
            numeric.replace(',', "").parse::<f64>().ok().map(|v| v * multiplier)
        }
        _ => None,
    }
}

/// Whether two endpoint classes may be directly linked by a
/// scale-sensitive relationship. Adjacent classes are fine (transformers
/// bridge them); Low <-> High is flagged.
pub fn scales_compatible(a: VoltageClass, b: VoltageClass) -> bool {
    !matches!(
        (a, b),
        (VoltageClass::Low, VoltageClass::High) | (VoltageClass::High, VoltageClass::Low)
    )
}

/// Case- and punctuation-insensitive lookup into a closed type set.
/// Returns the canonical spelling on a match.
pub struct TypeNormalizer {
    entity_lookup: HashMap<String, &'static str>,
    relationship_lookup: HashMap<String, &'static str>,
    strip: Regex,
}

impl TypeNormalizer {
    pub fn new() -> Self {
        let strip = Regex::new(r"[^a-z0-9]").expect("static regex");

        let mut entity_lookup = HashMap::new();
        for canonical in ENTITY_TYPES {
            entity_lookup.insert(fold(&strip, canonical), *canonical);
        }

        let mut relationship_lookup = HashMap::new();
        for canonical in RELATIONSHIP_TYPES {
            relationship_lookup.insert(fold(&strip, canonical), *canonical);
        }

        Self {
            entity_lookup,
            relationship_lookup,
            strip,
        }
    }

    pub fn entity_type(&self, raw: &str) -> Option<&'static str> {
        self.entity_lookup.get(&fold(&self.strip, raw)).copied()
    }

    pub fn relationship_type(&self, raw: &str) -> Option<&'static str> {
        self.relationship_lookup
            .get(&fold(&self.strip, raw))
            .copied()
    }
}

impl Default for TypeNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn fold(strip: &Regex, raw: &str) -> String {
    strip.replace_all(&raw.to_lowercase(), "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_type_normalization_is_case_and_punct_insensitive() {
        let normalizer = TypeNormalizer::new();

        assert_eq!(normalizer.entity_type("circuit_breaker"), Some("CircuitBreaker"));
        assert_eq!(normalizer.entity_type("Circuit Breaker"), Some("CircuitBreaker"));
        assert_eq!(normalizer.entity_type("TRANSFORMER"), Some("Transformer"));
        assert_eq!(normalizer.entity_type("widget"), None);
    }

    #[test]
    fn test_relationship_type_normalization() {
        let normalizer = TypeNormalizer::new();

        assert_eq!(normalizer.relationship_type("Connects To"), Some("connects_to"));
        assert_eq!(normalizer.relationship_type("FEEDS"), Some("feeds"));
        assert_eq!(normalizer.relationship_type("is_friends_with"), None);
    }

    #[test]
    fn test_voltage_classification_thresholds() {
        assert_eq!(classify_voltage(400.0), VoltageClass::Low);
        assert_eq!(classify_voltage(11_000.0), VoltageClass::Medium);
        assert_eq!(classify_voltage(110_000.0), VoltageClass::High);
    }

    #[test]
    fn test_infer_voltage_class_from_attributes() {
        let mut attrs = HashMap::new();
        attrs.insert("rated_voltage".to_string(), json!("110 kV"));
        assert_eq!(infer_voltage_class(&attrs), Some(VoltageClass::High));

        let mut attrs = HashMap::new();
        attrs.insert("voltage".to_string(), json!(400));
        assert_eq!(infer_voltage_class(&attrs), Some(VoltageClass::Low));

        let attrs = HashMap::new();
        assert_eq!(infer_voltage_class(&attrs), None);
    }

    #[test]
    fn test_scale_compatibility() {
        assert!(scales_compatible(VoltageClass::Low, VoltageClass::Medium));
        assert!(scales_compatible(VoltageClass::High, VoltageClass::High));
        assert!(!scales_compatible(VoltageClass::Low, VoltageClass::High));
    }
}
