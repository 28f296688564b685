use serde_json::Value;
use tracing::warn;

/// Kinds of graph objects that accept dynamic properties. Each kind has a
/// declared whitelist; keys outside it are logged and skipped instead of
/// being written blindly into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    EntityNode,
    RelationshipEdge,
}

const ENTITY_KEYS: &[&str] = &[
    "rated_voltage",
    "voltage",
    "nominal_voltage",
    "rated_current",
    "rated_power",
    "manufacturer",
    "model",
    "location",
    "status",
    "description",
];

const EDGE_KEYS: &[&str] = &["evidence", "description", "medium", "rating"];

impl PropKind {
    fn allowed(&self) -> &'static [&'static str] {
        match self {
            PropKind::EntityNode => ENTITY_KEYS,
            PropKind::RelationshipEdge => EDGE_KEYS,
        }
    }
}

/// A scalar property value the bolt driver can bind directly.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Typed property bag: whitelisted keys with bindable scalar values.
/// Arrays and nested objects are serialized to strings so no structure is
/// lost, but they never become query fragments.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    values: Vec<(String, PropValue)>,
}

impl PropertyBag {
    pub fn for_kind(kind: PropKind, attributes: &[(&str, &Value)]) -> Self {
        let mut bag = Self::default();
        for (key, value) in attributes {
            bag.insert_checked(kind, key, value);
        }
        bag
    }

    fn insert_checked(&mut self, kind: PropKind, key: &str, value: &Value) {
        if !kind.allowed().contains(&key) {
            warn!(?kind, key, "Skipping non-whitelisted property key");
            return;
        }

        let prop = match value {
            Value::String(s) => PropValue::Str(s.clone()),
            Value::Bool(b) => PropValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropValue::Int(i)
                } else {
                    PropValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::Null => return,
            other => PropValue::Str(other.to_string()),
        };

        self.values.push((key.to_string(), prop));
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn entries(&self) -> &[(String, PropValue)] {
        &self.values
    }

    /// SET fragment for the bag, e.g. `n.location = $p_location`.
    /// Key names come from the whitelist, so splicing them into the
    /// query text is safe.
    pub fn set_clause(&self, var: &str) -> String {
        self.values
            .iter()
            .map(|(key, _)| format!("{var}.{key} = $p_{key}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Bind the bag's values onto a query using `$p_<key>` names.
    pub fn bind(&self, mut query: neo4rs::Query) -> neo4rs::Query {
        for (key, value) in &self.values {
            let name = format!("p_{key}");
            query = match value {
                PropValue::Str(s) => query.param(&name, s.clone()),
                PropValue::Int(i) => query.param(&name, *i),
                PropValue::Float(f) => query.param(&name, *f),
                PropValue::Bool(b) => query.param(&name, *b),
            };
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whitelisted_keys_are_kept() {
        let voltage = json!("110 kV");
        let location = json!("Bay 3");
        let bag = PropertyBag::for_kind(
            PropKind::EntityNode,
            &[("rated_voltage", &voltage), ("location", &location)],
        );

        assert_eq!(bag.entries().len(), 2);
    }

    #[test]
    fn test_unknown_keys_are_skipped() {
        let evil = json!("x' DETACH DELETE n //");
        let bag = PropertyBag::for_kind(PropKind::EntityNode, &[("evil} = 1 //", &evil)]);

        assert!(bag.is_empty());
    }

    #[test]
    fn test_kinds_have_distinct_whitelists() {
        let value = json!("ok");
        let on_edge = PropertyBag::for_kind(PropKind::RelationshipEdge, &[("evidence", &value)]);
        let on_node = PropertyBag::for_kind(PropKind::EntityNode, &[("evidence", &value)]);

        assert_eq!(on_edge.entries().len(), 1);
        assert!(on_node.is_empty());
    }

    #[test]
    fn test_set_clause_shape() {
        let voltage = json!(110000);
        let bag = PropertyBag::for_kind(PropKind::EntityNode, &[("rated_voltage", &voltage)]);

        assert_eq!(bag.set_clause("e"), "e.rated_voltage = $p_rated_voltage");
        assert_eq!(
            bag.entries()[0],
            ("rated_voltage".to_string(), PropValue::Int(110000))
        );
    }

    #[test]
    fn test_nested_values_become_strings() {
        let nested = json!({"a": 1});
        let bag = PropertyBag::for_kind(PropKind::EntityNode, &[("description", &nested)]);

        assert_eq!(
            bag.entries()[0].1,
            PropValue::Str("{\"a\":1}".to_string())
        );
    }
}
