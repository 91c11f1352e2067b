//! RecordStore trait definition
//!
//! Abstracts the graph database behind the handful of operations the
//! embedding and query phases need, so both can run against the in-memory mock.

use super::models::{CorpusRecord, ScoredRecord};
use anyhow::Result;
use async_trait::async_trait;

/// Abstract interface to the record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records with both an id and a text, in store order.
    ///
    /// Records that already carry an embedding are skipped unless
    /// `include_embedded` is set.
    async fn list_embeddable_records(&self, include_embedded: bool) -> Result<Vec<CorpusRecord>>;

    /// Store one vector on the record with the given id.
    async fn persist_vector(&self, record_id: &str, vector: &[f32]) -> Result<()>;

    /// Records ranked by descending similarity to `vector`, at most `limit` of them.
    async fn query_similar(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredRecord>>;

    /// Bulk-load an embeddings artifact from the store's import directory.
    ///
    /// Returns the number of artifact rows the store processed.
    async fn import_artifact(&self, file_name: &str) -> Result<usize>;

    /// Number of records currently carrying an embedding.
    async fn count_embedded(&self) -> Result<usize>;
}
