//! The two phases of the application: embedding the corpus and answering questions

use crate::pipeline::{artifact, AggregatedResult, CsvArtifact, EmbeddingPipeline, PipelineError};
use crate::store::ScoredRecord;
use crate::stream::{self, AssembledAnswer};
use crate::{prompt, AppState, PersistMode};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Outcome of an embedding run, from listing to verified persistence.
#[derive(Debug, Clone)]
pub struct EmbeddingRunSummary {
    /// Records listed by the store
    pub records: usize,
    pub result: AggregatedResult,
    pub artifact_path: PathBuf,
    /// Artifact rows the store reported as processed
    pub persisted: usize,
    /// Ids whose vector the store refused (direct persistence only)
    pub unpersisted: Vec<String>,
    /// Records carrying an embedding after the run, counted by re-querying the store
    pub embedded_total: usize,
}

impl EmbeddingRunSummary {
    pub fn is_success(&self) -> bool {
        self.result.is_success() && self.unpersisted.is_empty()
    }
}

/// Retrieval-augmented generation over the record store.
pub struct RagService {
    state: AppState,
}

impl RagService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Embed the corpus, write the artifact, and have the store ingest it.
    ///
    /// Successful rows are persisted even when other records failed; the
    /// failures stay in the summary for the caller to report.
    pub async fn generate_embeddings(
        &self,
        include_embedded: bool,
        cancel: CancellationToken,
    ) -> Result<EmbeddingRunSummary> {
        let config = &self.state.config;

        let records = self
            .state
            .store
            .list_embeddable_records(include_embedded)
            .await
            .context("Failed to list records needing embeddings")?;
        let total = records.len();
        tracing::info!(records = total, include_embedded, "Loaded records from store");

        let mut csv = CsvArtifact::create(&config.artifact_path)
            .await
            .map_err(PipelineError::Artifact)
            .with_context(|| {
                format!(
                    "Failed to create artifact at {}",
                    config.artifact_path.display()
                )
            })?;

        let pipeline = EmbeddingPipeline::new(
            Arc::clone(&self.state.embedder),
            config.embeddings_workers,
        )
        .with_queue_capacity(config.queue_capacity)
        .with_abort_in_flight(config.abort_in_flight);

        let result = pipeline.run(records, &mut csv, cancel).await?;
        let artifact_path = csv
            .finish()
            .await
            .map_err(PipelineError::Artifact)
            .context("Failed to finalize embeddings artifact")?;

        let (persisted, unpersisted) = if result.written_count == 0 {
            tracing::info!("No embeddings written, skipping ingestion");
            (0, Vec::new())
        } else {
            match config.persist_mode {
                PersistMode::Import => {
                    let rows = self
                        .state
                        .store
                        .import_artifact(&config.import_file_name)
                        .await?;
                    (rows, Vec::new())
                }
                PersistMode::Direct => self.persist_rows(&artifact_path).await?,
            }
        };

        let embedded_total = self
            .state
            .store
            .count_embedded()
            .await
            .context("Failed to verify stored embeddings")?;
        if embedded_total < persisted {
            tracing::warn!(
                persisted,
                embedded_total,
                "Store holds fewer embeddings than it reported ingesting"
            );
        }

        Ok(EmbeddingRunSummary {
            records: total,
            result,
            artifact_path,
            persisted,
            unpersisted,
            embedded_total,
        })
    }

    /// Read the artifact back and store every vector with its own call.
    async fn persist_rows(&self, path: &std::path::Path) -> Result<(usize, Vec<String>)> {
        let vectors = artifact::read_artifact(path).await?;
        let mut persisted = 0;
        let mut rejected = Vec::new();

        for vector in vectors {
            match self
                .state
                .store
                .persist_vector(&vector.owner_id, &vector.values)
                .await
            {
                Ok(()) => persisted += 1,
                Err(e) => {
                    tracing::warn!(record_id = %vector.owner_id, error = %e, "Failed to store embedding");
                    rejected.push(vector.owner_id);
                }
            }
        }
        Ok((persisted, rejected))
    }

    /// Records most similar to `question`, best first.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredRecord>> {
        let vector = self
            .state
            .embedder
            .embed(question)
            .await
            .context("Failed to embed the question")?;
        let records = self
            .state
            .store
            .query_similar(&vector, self.state.config.retrieval_limit)
            .await?;
        for record in &records {
            tracing::info!(title = %record.title, score = record.score, "Retrieved record");
        }
        Ok(records)
    }

    /// Answer `question` from the most similar records, streaming the answer into `sink`.
    pub async fn answer<W>(&self, question: &str, sink: &mut W) -> Result<AssembledAnswer>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let similar = self.retrieve(question).await?;
        let prompt = prompt::render(&similar, question);
        tracing::debug!("Prompt created:\n{}", prompt);

        let lines = self
            .state
            .llm
            .generate_stream(&prompt)
            .await
            .context("Failed to start generation")?;
        let answer = stream::assemble(lines, sink).await?;

        tracing::debug!(
            eval_count = ?answer.metadata.eval_count,
            total_duration = ?answer.metadata.total_duration,
            "Answer assembled"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LanguageModel, MockLanguageModel, TransportError};
    use crate::store::{MockRecordStore, RecordStore};
    use crate::{Config, YamlConfig};
    use std::path::Path;

    const CREDS: [(&str, &str); 2] = [("NEO4J_USER", "neo4j"), ("NEO4J_PASSWORD", "secret")];

    fn config(import_dir: &Path, mode: PersistMode) -> Config {
        let mut yaml = YamlConfig::default();
        yaml.pipeline.artifact_path = import_dir.join("embeddings.csv");
        yaml.pipeline.persist_mode = mode;
        yaml.embeddings.workers = 2;
        yaml.retrieval.limit = 2;
        Config::from_lookup(yaml, |key| {
            CREDS
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    fn movies(import_dir: &Path) -> MockRecordStore {
        MockRecordStore::new()
            .with_import_dir(import_dir)
            .with_record("1", "Toy Story", "toys come to life")
            .with_record("2", "Heat", "a bank heist in los angeles")
            .with_record("3", "Pinocchio", "a wooden puppet becomes a boy")
    }

    fn state(
        store: Arc<MockRecordStore>,
        embedder: Arc<MockLanguageModel>,
        llm: Arc<MockLanguageModel>,
        config: Config,
    ) -> AppState {
        AppState {
            store,
            embedder,
            llm,
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn test_import_persists_successes_despite_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(movies(dir.path()));
        let embedder = Arc::new(MockLanguageModel::new(8).with_failure(
            "a bank heist in los angeles",
            TransportError::Timeout {
                url: "mock://embeddings".into(),
            },
        ));
        let service = RagService::new(state(
            store.clone(),
            embedder,
            Arc::new(MockLanguageModel::new(8)),
            config(dir.path(), PersistMode::Import),
        ));

        let summary = service
            .generate_embeddings(false, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(summary.result.written_count, 2);
        assert_eq!(summary.result.failed_ids(), vec!["2"]);
        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.embedded_total, 2);
        assert!(!summary.is_success());
        assert!(store.embedding_of("2").await.is_none());
        assert_eq!(store.embedding_of("1").await.map(|e| e.len()), Some(8));
        assert!(summary.artifact_path.exists());
    }

    #[tokio::test]
    async fn test_direct_mode_reports_rejected_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(movies(dir.path()).rejecting("3"));
        let service = RagService::new(state(
            store.clone(),
            Arc::new(MockLanguageModel::new(4)),
            Arc::new(MockLanguageModel::new(4)),
            config(dir.path(), PersistMode::Direct),
        ));

        let summary = service
            .generate_embeddings(false, CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.result.is_success());
        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.unpersisted, vec!["3".to_string()]);
        assert_eq!(summary.embedded_total, 2);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(movies(dir.path()));
        let embedder = Arc::new(MockLanguageModel::new(4));
        let service = RagService::new(state(
            store,
            embedder.clone(),
            Arc::new(MockLanguageModel::new(4)),
            config(dir.path(), PersistMode::Import),
        ));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = service.generate_embeddings(false, cancel).await.unwrap();

        assert!(summary.result.cancelled);
        assert!(summary.is_success());
        assert_eq!(summary.result.never_attempted, 3);
        assert_eq!(summary.persisted, 0);
        assert_eq!(embedder.embed_calls(), 0);
        assert_eq!(
            std::fs::read_to_string(&summary.artifact_path).unwrap(),
            "movie_id,embedding\n"
        );
    }

    #[tokio::test]
    async fn test_rerun_skips_embedded_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(movies(dir.path()));
        let embedder = Arc::new(MockLanguageModel::new(4));
        let service = RagService::new(state(
            store,
            embedder.clone(),
            Arc::new(MockLanguageModel::new(4)),
            config(dir.path(), PersistMode::Import),
        ));

        service
            .generate_embeddings(false, CancellationToken::new())
            .await
            .unwrap();
        let second = service
            .generate_embeddings(false, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.records, 0);
        assert_eq!(second.embedded_total, 3);
        assert_eq!(embedder.embed_calls(), 3);

        let all = service
            .generate_embeddings(true, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(all.records, 3);
        assert_eq!(all.result.written_count, 3);
    }

    #[tokio::test]
    async fn test_answer_streams_grounded_response() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(MockLanguageModel::new(16));
        let store = Arc::new(movies(dir.path()));
        for (id, plot) in [
            ("1", "toys come to life"),
            ("2", "a bank heist in los angeles"),
            ("3", "a wooden puppet becomes a boy"),
        ] {
            let vector = embedder.embed(plot).await.unwrap();
            store.persist_vector(id, &vector).await.unwrap();
        }
        let llm = Arc::new(MockLanguageModel::new(16).with_stream_lines([
            r#"{"response":"Watch ","done":false}"#,
            r#"{"response":"Heat.","done":true,"eval_count":2}"#,
        ]));
        let service = RagService::new(state(
            store,
            embedder,
            llm.clone(),
            config(dir.path(), PersistMode::Import),
        ));

        let mut out: Vec<u8> = Vec::new();
        let answer = service
            .answer("a bank heist in los angeles", &mut out)
            .await
            .unwrap();

        assert_eq!(answer.full_text, "Watch Heat.");
        assert_eq!(answer.metadata.eval_count, Some(2));
        assert_eq!(out, b"Watch Heat.\n");

        let prompt = llm.last_prompt().await.unwrap();
        // Identical text embeds identically, so Heat ranks first
        let heat = prompt.find("Title: Heat\n").unwrap();
        assert!(prompt.matches("Title: ").count() == 2);
        assert!(heat < prompt.find("Question:").unwrap());
    }

    #[tokio::test]
    async fn test_answer_surfaces_truncated_stream() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(
            MockLanguageModel::new(4).with_stream_lines([r#"{"response":"Watch","done":false}"#]),
        );
        let service = RagService::new(state(
            Arc::new(movies(dir.path())),
            Arc::new(MockLanguageModel::new(4)),
            llm,
            config(dir.path(), PersistMode::Import),
        ));

        let mut out: Vec<u8> = Vec::new();
        let err = service.answer("anything", &mut out).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<stream::AssemblyError>(),
            Some(stream::AssemblyError::Truncated { .. })
        ));
        assert_eq!(out, b"Watch\n");
    }
}
