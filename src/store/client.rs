//! Neo4j client for the corpus graph

use super::models::{CorpusRecord, ScoredRecord, StoreSchema};
use super::traits::RecordStore;
use crate::pipeline::artifact::ARTIFACT_ID_COLUMN;
use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph, Query};
use std::sync::Arc;

/// Client for Neo4j operations
pub struct Neo4jClient {
    graph: Arc<Graph>,
    schema: StoreSchema,
}

impl Neo4jClient {
    /// Connect and make sure the vector index exists.
    pub async fn new(uri: &str, user: &str, password: &str, schema: StoreSchema) -> Result<Self> {
        schema.validate()?;

        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;

        let client = Self {
            graph: Arc::new(graph),
            schema,
        };

        client.init_schema().await?;

        Ok(client)
    }

    /// Create the vector index used by similarity queries.
    ///
    /// Requires Neo4j 5.13+; skipped with a warning when unsupported or when the
    /// embedding dimensions are unknown.
    async fn init_schema(&self) -> Result<()> {
        let Some(dimensions) = self.schema.dimensions else {
            tracing::debug!(
                index = %self.schema.vector_index,
                "Embedding dimensions not configured, leaving vector index as is"
            );
            return Ok(());
        };

        let cypher = format!(
            r#"CREATE VECTOR INDEX {index} IF NOT EXISTS
               FOR (n:{label}) ON (n.{property})
               OPTIONS {{indexConfig: {{
                   `vector.dimensions`: {dimensions},
                   `vector.similarity_function`: 'cosine'
               }}}}"#,
            index = self.schema.vector_index,
            label = self.schema.label,
            property = self.schema.embedding_property,
        );

        if let Err(e) = self.graph.run(query(&cypher)).await {
            tracing::warn!(
                "Vector index creation skipped (Neo4j may not support vector indexes): {}",
                e
            );
        }

        Ok(())
    }

    /// Execute a parameterized Cypher query and collect its rows
    async fn execute_with_params(&self, q: Query) -> Result<Vec<neo4rs::Row>> {
        let mut result = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn count(&self, q: Query) -> Result<usize> {
        let rows = self.execute_with_params(q).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.get("total")?,
            None => 0,
        };
        Ok(count.max(0) as usize)
    }
}

/// Only file names are accepted: the store resolves them inside its own import directory.
fn validate_import_file_name(file_name: &str) -> Result<()> {
    let valid = !file_name.is_empty()
        && !file_name.contains(['/', '\\', '\'', '"', '`'])
        && file_name != ".."
        && file_name != ".";
    if !valid {
        anyhow::bail!("invalid import file name {file_name:?}");
    }
    Ok(())
}

/// `LOAD CSV` query that sets the vector of every node named in the artifact.
///
/// Ids are stored as strings, so the row id matches the property directly and
/// the lookup can use an index on it.
fn import_cypher(schema: &StoreSchema, file_name: &str) -> String {
    format!(
        r#"
        LOAD CSV WITH HEADERS
        FROM 'file:///{file_name}'
        AS row
        MATCH (n:{label} {{{id}: row.{column}}})
        CALL db.create.setNodeVectorProperty(n, $property, apoc.convert.fromJsonList(row.embedding))
        RETURN count(*) AS total
        "#,
        label = schema.label,
        id = schema.id_property,
        column = ARTIFACT_ID_COLUMN,
    )
}

#[async_trait]
impl RecordStore for Neo4jClient {
    async fn list_embeddable_records(&self, include_embedded: bool) -> Result<Vec<CorpusRecord>> {
        let s = &self.schema;
        let missing_filter = if include_embedded {
            String::new()
        } else {
            format!("AND n.{} IS NULL", s.embedding_property)
        };
        let cypher = format!(
            r#"
            MATCH (n:{label})
            WHERE n.{id} IS NOT NULL
            AND n.{text} IS NOT NULL
            {missing_filter}
            RETURN toString(n.{id}) AS id, n.{text} AS text
            "#,
            label = s.label,
            id = s.id_property,
            text = s.text_property,
        );

        let rows = self.execute_with_params(query(&cypher)).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = match row.get("id") {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping record without a readable id: {}", e);
                    continue;
                }
            };
            let text: String = match row.get("text") {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(record_id = %id, "Skipping record without readable text: {}", e);
                    continue;
                }
            };
            records.push(CorpusRecord { id, text });
        }

        tracing::debug!("Listed {} embeddable records", records.len());
        Ok(records)
    }

    async fn persist_vector(&self, record_id: &str, vector: &[f32]) -> Result<()> {
        // neo4rs has no f32 list type
        let embedding_f64: Vec<f64> = vector.iter().map(|&x| x as f64).collect();

        let cypher = format!(
            r#"
            MATCH (n:{label} {{{id}: $id}})
            CALL db.create.setNodeVectorProperty(n, $property, $embedding)
            RETURN count(n) AS total
            "#,
            label = self.schema.label,
            id = self.schema.id_property,
        );
        let q = query(&cypher)
            .param("id", record_id.to_string())
            .param("property", self.schema.embedding_property.clone())
            .param("embedding", embedding_f64);

        let updated = self
            .count(q)
            .await
            .with_context(|| format!("Failed to set embedding on record {}", record_id))?;
        if updated == 0 {
            anyhow::bail!("No record with id {} to store an embedding on", record_id);
        }
        Ok(())
    }

    async fn query_similar(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredRecord>> {
        let embedding_f64: Vec<f64> = vector.iter().map(|&x| x as f64).collect();
        let s = &self.schema;

        let cypher = format!(
            r#"
            CALL db.index.vector.queryNodes($index, $limit, $embedding)
            YIELD node, score
            RETURN toString(node.{id}) AS id, node.{title} AS title, node.{text} AS text, score
            ORDER BY score DESC
            "#,
            id = s.id_property,
            title = s.title_property,
            text = s.text_property,
        );
        let q = query(&cypher)
            .param("index", s.vector_index.clone())
            .param("limit", limit as i64)
            .param("embedding", embedding_f64);

        let rows = self
            .execute_with_params(q)
            .await
            .context("Vector similarity query failed")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let score: f64 = match row.get("score") {
                Ok(score) => score,
                Err(e) => {
                    tracing::warn!("Skipping similarity row without score: {}", e);
                    continue;
                }
            };
            records.push(ScoredRecord {
                id: row.get("id").unwrap_or_default(),
                title: row.get("title").unwrap_or_default(),
                text: row.get("text").unwrap_or_default(),
                score,
            });
        }
        Ok(records)
    }

    async fn import_artifact(&self, file_name: &str) -> Result<usize> {
        validate_import_file_name(file_name)?;

        let cypher = import_cypher(&self.schema, file_name);
        let q = query(&cypher).param("property", self.schema.embedding_property.clone());

        let rows = self
            .count(q)
            .await
            .with_context(|| format!("Failed to import embeddings from {}", file_name))?;
        tracing::info!(file = file_name, rows, "Store ingested embeddings artifact");
        Ok(rows)
    }

    async fn count_embedded(&self) -> Result<usize> {
        let cypher = format!(
            "MATCH (n:{label}) WHERE n.{property} IS NOT NULL RETURN count(n) AS total",
            label = self.schema.label,
            property = self.schema.embedding_property,
        );
        self.count(query(&cypher)).await
    }
}
