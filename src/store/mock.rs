//! In-memory mock implementation of RecordStore for testing.
//!
//! Similarity is brute-force cosine over the stored vectors, which is plenty for
//! a handful of test records. `import_artifact` reads the artifact from a local
//! directory that stands in for the store's import directory.

use super::models::{CorpusRecord, ScoredRecord};
use super::traits::RecordStore;
use crate::pipeline::artifact::read_artifact;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRecord {
    id: String,
    title: String,
    text: String,
    embedding: Option<Vec<f32>>,
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MockRecordStore {
    records: RwLock<Vec<StoredRecord>>,
    import_dir: Option<PathBuf>,
    rejected_ids: HashSet<String>,
}

impl MockRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record without an embedding.
    pub fn with_record(mut self, id: &str, title: &str, text: &str) -> Self {
        self.records.get_mut().push(StoredRecord {
            id: id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
            embedding: None,
        });
        self
    }

    /// Resolve `import_artifact` file names inside `dir`.
    pub fn with_import_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.import_dir = Some(dir.into());
        self
    }

    /// Make `persist_vector` fail for this id.
    pub fn rejecting(mut self, id: &str) -> Self {
        self.rejected_ids.insert(id.to_string());
        self
    }

    /// The stored embedding of a record, if any.
    pub async fn embedding_of(&self, id: &str) -> Option<Vec<f32>> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.embedding.clone())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn list_embeddable_records(&self, include_embedded: bool) -> Result<Vec<CorpusRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| include_embedded || r.embedding.is_none())
            .map(|r| CorpusRecord::new(r.id.clone(), r.text.clone()))
            .collect())
    }

    async fn persist_vector(&self, record_id: &str, vector: &[f32]) -> Result<()> {
        if self.rejected_ids.contains(record_id) {
            anyhow::bail!("store rejected embedding for record {record_id}");
        }
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record_id) {
            Some(record) => {
                record.embedding = Some(vector.to_vec());
                Ok(())
            }
            None => anyhow::bail!("No record with id {} to store an embedding on", record_id),
        }
    }

    async fn query_similar(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredRecord>> {
        let records = self.records.read().await;
        let mut scored: Vec<ScoredRecord> = records
            .iter()
            .filter_map(|r| {
                r.embedding.as_ref().map(|e| ScoredRecord {
                    id: r.id.clone(),
                    title: r.title.clone(),
                    text: r.text.clone(),
                    score: cosine(vector, e),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn import_artifact(&self, file_name: &str) -> Result<usize> {
        let Some(dir) = &self.import_dir else {
            anyhow::bail!("mock store has no import directory");
        };
        let vectors = read_artifact(dir.join(file_name)).await?;
        let mut rows = 0;
        for vector in vectors {
            // Rows without a matching record are counted by nobody, like MATCH in Cypher
            if self.persist_vector(&vector.owner_id, &vector.values).await.is_ok() {
                rows += 1;
            }
        }
        Ok(rows)
    }

    async fn count_embedded(&self) -> Result<usize> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.embedding.is_some())
            .count())
    }
}
