//! Data models for records read from and written to the store

use serde::{Deserialize, Serialize};

/// One text record of the corpus, e.g. a movie and its plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub id: String,
    pub text: String,
}

impl CorpusRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One ranked row of a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub id: String,
    pub title: String,
    pub text: String,
    pub score: f64,
}

/// Where the corpus lives in the graph.
///
/// Labels and property names are interpolated into Cypher, so they must be plain
/// identifiers (see [`StoreSchema::validate`]).
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSchema {
    pub label: String,
    pub id_property: String,
    pub text_property: String,
    pub title_property: String,
    pub embedding_property: String,
    pub vector_index: String,
    /// Vector length used when creating the index; index creation is skipped when unknown
    pub dimensions: Option<usize>,
}

impl Default for StoreSchema {
    fn default() -> Self {
        Self {
            label: "Movie".into(),
            id_property: "movieId".into(),
            text_property: "plot".into(),
            title_property: "title".into(),
            embedding_property: "embedding".into(),
            vector_index: "moviePlots".into(),
            dimensions: None,
        }
    }
}

impl StoreSchema {
    /// Reject names that are not safe to splice into a Cypher query.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (what, name) in [
            ("label", &self.label),
            ("id property", &self.id_property),
            ("text property", &self.text_property),
            ("title property", &self.title_property),
            ("embedding property", &self.embedding_property),
            ("vector index", &self.vector_index),
        ] {
            let valid = name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                anyhow::bail!("invalid {what} {name:?}: expected a plain identifier");
            }
        }
        Ok(())
    }
}
