use anyhow::{Context, Result};
use neo4rs::{Graph, Query};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use extract::{Entity, Relationship};
use ingest::Document;

use crate::props::{PropKind, PropertyBag};

/// Outcome of one storage call. Per-item failures land in `errors`; the
/// call itself only fails on connection-level problems.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreReport {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub name: String,
    pub entity_type: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationRecord {
    pub from: String,
    pub rel_type: String,
    pub to: String,
    pub confidence: f64,
    pub validation_warning: Option<String>,
}

/// Entities and the relations among them around a set of seed keys.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Neighborhood {
    pub entities: Vec<EntityRecord>,
    pub relations: Vec<RelationRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphCounts {
    pub entity_count: usize,
    pub relationship_count: usize,
}

/// Project-scoped, idempotent storage manager over the bolt driver.
/// Entities are keyed by `(project_id, entity_id)`, Documents by
/// `(project_id, id)`, relationships by `(project_id, from, type, to)`.
pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE INDEX entity_key_index IF NOT EXISTS FOR (e:Entity) ON (e.project_id, e.entity_id)",
            "CREATE INDEX document_key_index IF NOT EXISTS FOR (d:Document) ON (d.project_id, d.id)",
            "CREATE INDEX actual_value_index IF NOT EXISTS FOR (v:ActualValue) ON (v.project_id, v.category, v.field_name)",
        ];

        for statement in statements {
            self.graph
                .run(Query::new(statement.to_string()))
                .await
                .context("Failed to create index")?;
        }

        Ok(())
    }

    /// Create or refresh the Document node. Documents use the `id` key,
    /// not `entity_id`.
    pub async fn merge_document(&self, document: &Document) -> Result<()> {
        let query = Query::new(
            r#"
            MERGE (d:Document {project_id: $project_id, id: $id})
            SET d.filename = $filename,
                d.content_hash = $content_hash
            "#
            .to_string(),
        )
        .param("project_id", document.project_id.clone())
        .param("id", document.id.clone())
        .param("filename", document.filename.clone())
        .param("content_hash", document.content_hash.clone());

        self.graph
            .run(query)
            .await
            .context("Failed to merge document node")?;

        Ok(())
    }

    /// Merge a validated extraction into the graph. Entities first so
    /// same-pass relationship endpoints exist, then relationships.
    pub async fn store_extraction(
        &self,
        project_id: &str,
        document_id: &str,
        entities: &[Entity],
        relationships: &[Relationship],
        source_section: &str,
    ) -> Result<StoreReport> {
        let mut report = StoreReport::default();

        for entity in entities {
            match self
                .merge_entity(project_id, document_id, entity, source_section)
                .await
            {
                Ok(true) => report.nodes_created += 1,
                Ok(false) => report.nodes_updated += 1,
                Err(e) => {
                    warn!(entity_id = %entity.id, error = %e, "Entity merge failed");
                    report
                        .errors
                        .push(format!("entity {}: {}", entity.id, e));
                }
            }
        }

        for rel in relationships {
            match self.merge_relationship(project_id, document_id, rel).await {
                Ok(true) => report.edges_created += 1,
                Ok(false) => report.edges_updated += 1,
                Err(e) => {
                    warn!(
                        from = %rel.from,
                        rel_type = %rel.rel_type,
                        to = %rel.to,
                        error = %e,
                        "Relationship merge failed"
                    );
                    report.errors.push(format!(
                        "relationship {} -{}-> {}: {}",
                        rel.from, rel.rel_type, rel.to, e
                    ));
                }
            }
        }

        debug!(
            project_id,
            document_id,
            nodes_created = report.nodes_created,
            nodes_updated = report.nodes_updated,
            edges_created = report.edges_created,
            edges_updated = report.edges_updated,
            "Stored extraction"
        );

        Ok(report)
    }

    async fn merge_entity(
        &self,
        project_id: &str,
        document_id: &str,
        entity: &Entity,
        source_section: &str,
    ) -> Result<bool> {
        let attrs: Vec<(&str, &Value)> = entity
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        let bag = PropertyBag::for_kind(PropKind::EntityNode, &attrs);

        // Last-write-wins per attribute: every merge re-SETs the
        // whitelisted attributes and stamps last_extracted_at.
        let mut cypher = String::from(
            r#"
            MERGE (e:Entity {project_id: $project_id, entity_id: $entity_id})
            ON CREATE SET e.first_seen = true
            WITH e, coalesce(e.first_seen, false) AS created
            REMOVE e.first_seen
            SET e.name = $name,
                e.entity_type = $entity_type,
                e.confidence = $confidence,
                e.document_id = $document_id,
                e.source_section_path = $source_section,
                e.last_extracted_at = timestamp()
            "#,
        );
        if entity.voltage_class.is_some() {
            cypher.push_str(", e.voltage_class = $voltage_class\n");
        }
        if !bag.is_empty() {
            cypher.push_str(", ");
            cypher.push_str(&bag.set_clause("e"));
            cypher.push('\n');
        }
        cypher.push_str("RETURN created");

        let mut query = Query::new(cypher)
            .param("project_id", project_id.to_string())
            .param("entity_id", entity.id.clone())
            .param("name", entity.name.clone())
            .param("entity_type", entity.entity_type.clone())
            .param("confidence", entity.confidence)
            .param("document_id", document_id.to_string())
            .param("source_section", source_section.to_string());
        if let Some(class) = entity.voltage_class {
            query = query.param("voltage_class", class.as_str().to_string());
        }
        query = bag.bind(query);

        let mut result = self
            .graph
            .execute(query)
            .await
            .context("Entity merge query failed")?;

        match result.next().await? {
            Some(row) => Ok(row.get::<bool>("created").unwrap_or(false)),
            None => anyhow::bail!("entity merge returned no row"),
        }
    }

    async fn merge_relationship(
        &self,
        project_id: &str,
        document_id: &str,
        rel: &Relationship,
    ) -> Result<bool> {
        let attrs: Vec<(&str, &Value)> =
            rel.attributes.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let bag = PropertyBag::for_kind(PropKind::RelationshipEdge, &attrs);

        // Document-sourced edges use the Document `id` key; entity edges
        // use `entity_id`. The two merge paths must stay distinct.
        let from_match = if rel.from == document_id {
            "MATCH (a:Document {project_id: $project_id, id: $from})"
        } else {
            "MATCH (a:Entity {project_id: $project_id, entity_id: $from})"
        };
        let to_match = if rel.to == document_id {
            "MATCH (b:Document {project_id: $project_id, id: $to})"
        } else {
            "MATCH (b:Entity {project_id: $project_id, entity_id: $to})"
        };

        let mut cypher = format!(
            r#"
            {from_match}
            {to_match}
            MERGE (a)-[r:RELATION {{rel_type: $rel_type}}]->(b)
            ON CREATE SET r.first_seen = true
            WITH r, coalesce(r.first_seen, false) AS created
            REMOVE r.first_seen
            SET r.confidence = $confidence,
                r.document_id = $document_id
            "#
        );
        if rel.validation_warning.is_some() {
            cypher.push_str(", r.validation_warning = $validation_warning\n");
        }
        if !bag.is_empty() {
            cypher.push_str(", ");
            cypher.push_str(&bag.set_clause("r"));
            cypher.push('\n');
        }
        cypher.push_str("RETURN created");

        let mut query = Query::new(cypher)
            .param("project_id", project_id.to_string())
            .param("from", rel.from.clone())
            .param("to", rel.to.clone())
            .param("rel_type", rel.rel_type.clone())
            .param("confidence", rel.confidence)
            .param("document_id", document_id.to_string());
        if let Some(warning) = &rel.validation_warning {
            query = query.param("validation_warning", warning.clone());
        }
        query = bag.bind(query);

        let mut result = self
            .graph
            .execute(query)
            .await
            .context("Relationship merge query failed")?;

        match result.next().await? {
            Some(row) => Ok(row.get::<bool>("created").unwrap_or(false)),
            None => anyhow::bail!("endpoint missing in graph"),
        }
    }

    /// Attach derived metadata to the Document node after ingestion.
    pub async fn update_document_metadata(
        &self,
        project_id: &str,
        document_id: &str,
        entity_count: usize,
        relationship_count: usize,
    ) -> Result<()> {
        let query = Query::new(
            r#"
            MATCH (d:Document {project_id: $project_id, id: $id})
            SET d.entity_count = $entity_count,
                d.relationship_count = $relationship_count,
                d.completed_at = timestamp()
            "#
            .to_string(),
        )
        .param("project_id", project_id.to_string())
        .param("id", document_id.to_string())
        .param("entity_count", entity_count as i64)
        .param("relationship_count", relationship_count as i64);

        self.graph
            .run(query)
            .await
            .context("Failed to update document metadata")?;

        Ok(())
    }

    /// Persist a guide's extracted value, linked to the guide node and
    /// its spec-field category for provenance. Never linked to the
    /// Document node; document_id is a plain property.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_actual_value(
        &self,
        project_id: &str,
        category: &str,
        field_name: &str,
        document_id: &str,
        value: &str,
        confidence: f64,
        explanation: &str,
        source_section: &str,
    ) -> Result<()> {
        let query = Query::new(
            r#"
            MERGE (f:SpecField {project_id: $project_id, category: $category})
            MERGE (g:ExtractionGuide {project_id: $project_id, category: $category, field_name: $field_name})
            MERGE (v:ActualValue {project_id: $project_id, category: $category, field_name: $field_name, document_id: $document_id})
            SET v.value = $value,
                v.confidence = $confidence,
                v.explanation = $explanation,
                v.source_section = $source_section,
                v.extracted_at = timestamp()
            MERGE (f)-[:HAS_VALUE]->(v)
            MERGE (g)-[:EXTRACTED]->(v)
            "#
            .to_string(),
        )
        .param("project_id", project_id.to_string())
        .param("category", category.to_string())
        .param("field_name", field_name.to_string())
        .param("document_id", document_id.to_string())
        .param("value", value.to_string())
        .param("confidence", confidence.clamp(0.0, 1.0))
        .param("explanation", explanation.to_string())
        .param("source_section", source_section.to_string());

        self.graph
            .run(query)
            .await
            .context("Failed to store actual value")?;

        Ok(())
    }

    /// Bounded-hop neighborhood around a set of entity keys, scoped to
    /// one project.
    pub async fn fetch_neighborhood(
        &self,
        project_id: &str,
        seed_keys: &[String],
        hops: usize,
    ) -> Result<Neighborhood> {
        let mut keys: Vec<String> = seed_keys.to_vec();

        for _ in 0..hops {
            if keys.is_empty() {
                break;
            }

            let query = Query::new(
                r#"
                MATCH (e:Entity {project_id: $project_id})-[r:RELATION]-(n:Entity {project_id: $project_id})
                WHERE e.entity_id IN $keys
                RETURN DISTINCT n.entity_id AS neighbor_id
                "#
                .to_string(),
            )
            .param("project_id", project_id.to_string())
            .param("keys", keys.clone());

            let mut result = self.graph.execute(query).await?;
            while let Some(row) = result.next().await? {
                if let Ok(neighbor) = row.get::<String>("neighbor_id") {
                    if !keys.contains(&neighbor) {
                        keys.push(neighbor);
                    }
                }
            }
        }

        if keys.is_empty() {
            return Ok(Neighborhood::default());
        }

        let mut neighborhood = Neighborhood::default();

        let query = Query::new(
            r#"
            MATCH (e:Entity {project_id: $project_id})
            WHERE e.entity_id IN $keys
            RETURN e.entity_id AS entity_id, e.name AS name,
                   e.entity_type AS entity_type, e.confidence AS confidence
            "#
            .to_string(),
        )
        .param("project_id", project_id.to_string())
        .param("keys", keys.clone());

        let mut result = self.graph.execute(query).await?;
        while let Some(row) = result.next().await? {
            neighborhood.entities.push(EntityRecord {
                entity_id: row.get("entity_id")?,
                name: row.get("name").unwrap_or_default(),
                entity_type: row.get("entity_type").unwrap_or_default(),
                confidence: row.get("confidence").unwrap_or(0.0),
            });
        }

        let query = Query::new(
            r#"
            MATCH (a:Entity {project_id: $project_id})-[r:RELATION]->(b:Entity {project_id: $project_id})
            WHERE a.entity_id IN $keys AND b.entity_id IN $keys
            RETURN a.entity_id AS from, r.rel_type AS rel_type, b.entity_id AS to,
                   r.confidence AS confidence, r.validation_warning AS validation_warning
            LIMIT 100
            "#
            .to_string(),
        )
        .param("project_id", project_id.to_string())
        .param("keys", keys);

        let mut result = self.graph.execute(query).await?;
        while let Some(row) = result.next().await? {
            neighborhood.relations.push(RelationRecord {
                from: row.get("from")?,
                rel_type: row.get("rel_type")?,
                to: row.get("to")?,
                confidence: row.get("confidence").unwrap_or(0.0),
                validation_warning: row.get("validation_warning").ok(),
            });
        }

        Ok(neighborhood)
    }

    /// Per-project entity/relationship counts.
    pub async fn get_project_counts(&self, project_id: &str) -> Result<GraphCounts> {
        let query = Query::new(
            "MATCH (e:Entity {project_id: $project_id}) RETURN count(e) AS count".to_string(),
        )
        .param("project_id", project_id.to_string());

        let mut result = self.graph.execute(query).await?;
        let entity_count = match result.next().await? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };

        let query = Query::new(
            r#"
            MATCH (:Entity {project_id: $project_id})-[r:RELATION]->(:Entity {project_id: $project_id})
            RETURN count(r) AS count
            "#
            .to_string(),
        )
        .param("project_id", project_id.to_string());

        let mut result = self.graph.execute(query).await?;
        let relationship_count = match result.next().await? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };

        Ok(GraphCounts {
            entity_count,
            relationship_count,
        })
    }

    /// Delete every node belonging to a project. The caller is expected
    /// to drop the project's vector collections alongside this.
    pub async fn teardown_project(&self, project_id: &str) -> Result<()> {
        let query = Query::new(
            "MATCH (n {project_id: $project_id}) DETACH DELETE n".to_string(),
        )
        .param("project_id", project_id.to_string());

        self.graph
            .run(query)
            .await
            .context("Failed to tear down project")?;

        Ok(())
    }
}
