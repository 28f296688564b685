use crate::ontology::{ENTITY_TYPES, RELATIONSHIP_TYPES};

pub const EXTRACTION_SYSTEM_PROMPT: &str =
    "You extract equipment entities and relationships from technical documents. \
     Output only valid JSON matching the requested schema.";

pub fn build_extraction_prompt(section_title: &str, section_content: &str) -> String {
    format!(
        r#"Extract entities and relationships from the following document section.

INSTRUCTIONS:
1. Identify equipment and systems mentioned in the text
2. Extract directed relationships between them
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"id": "unique_id", "name": "EntityName", "type": "<entity type>", "attributes": {{"rated_voltage": "110 kV"}}, "confidence": 0.9}}
  ],
  "relationships": [
    {{"from": "unique_id", "to": "other_id", "type": "<relationship type>", "attributes": {{}}, "confidence": 0.8}}
  ]
}}

RULES:
- Entity types must be one of: {}
- Relationship types must be one of: {}
- Use stable IDs derived from names, e.g. "TR_1" for "Transformer 1"
- Confidence is your certainty in [0, 1]
- Include numeric attributes (voltages, ratings) when the text states them
- Both endpoints of every relationship must appear in "entities"
- Output ONLY the JSON object, no markdown, no explanations

SECTION TITLE: {}

SECTION TEXT:
{}

JSON OUTPUT:"#,
        ENTITY_TYPES.join(", "),
        RELATIONSHIP_TYPES.join(", "),
        section_title,
        section_content
    )
}
