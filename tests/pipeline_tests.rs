//! End-to-end tests of the embedding pipeline against the in-memory mocks
//!
//! Run with: cargo test --test pipeline_tests

use knowledge_graph_rag::llm::{MockLanguageModel, TransportError};
use knowledge_graph_rag::pipeline::artifact::read_artifact;
use knowledge_graph_rag::pipeline::{
    AggregatedResult, CsvArtifact, EmbeddingPipeline, JobError, PipelineError,
};
use knowledge_graph_rag::store::{CorpusRecord, MockRecordStore, RecordStore};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn plots(n: usize) -> Vec<CorpusRecord> {
    (1..=n)
        .map(|i| CorpusRecord::new(format!("{i}"), format!("plot number {i}")))
        .collect()
}

fn workers(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn timeout() -> TransportError {
    TransportError::Timeout {
        url: "http://localhost:8000/api/embeddings".into(),
    }
}

async fn run(
    pipeline: &EmbeddingPipeline,
    records: Vec<CorpusRecord>,
    path: &Path,
    cancel: CancellationToken,
) -> AggregatedResult {
    let mut artifact = CsvArtifact::create(path).await.unwrap();
    let result = pipeline.run(records, &mut artifact, cancel).await.unwrap();
    artifact.finish().await.unwrap();
    result
}

#[tokio::test]
async fn test_one_timeout_two_successes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.csv");
    let model = Arc::new(MockLanguageModel::new(8).with_failure("plot number 2", timeout()));
    let pipeline = EmbeddingPipeline::new(model, workers(3));

    let result = run(&pipeline, plots(3), &path, CancellationToken::new()).await;

    assert_eq!(result.written_count, 2);
    assert_eq!(result.failure_count(), 1);
    assert_eq!(result.failures[0].record_id, "2");
    assert_eq!(result.failures[0].cause, JobError::Transport(timeout()));

    let rows = read_artifact(&path).await.unwrap();
    let mut ids: Vec<_> = rows.iter().map(|r| r.owner_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "3"]);
    assert!(rows.iter().all(|r| r.values.len() == 8));

    let err = result.into_result().unwrap_err();
    assert!(matches!(err, PipelineError::PartialFailure { written: 2, .. }));
    assert!(err.to_string().contains("2: request to"));
}

#[tokio::test]
async fn test_outcome_count_matches_records() {
    for n in [0, 1, 2, 10, 33] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.csv");
        let mut model = MockLanguageModel::new(4);
        for i in (1..=n).filter(|i| i % 4 == 0) {
            model = model.with_failure(&format!("plot number {i}"), timeout());
        }
        let model = Arc::new(model);
        let pipeline = EmbeddingPipeline::new(model.clone(), workers(4)).with_queue_capacity(2);

        let result = run(&pipeline, plots(n), &path, CancellationToken::new()).await;

        assert_eq!(result.written_count + result.failure_count(), n, "n = {n}");
        assert_eq!(result.failure_count(), n / 4, "n = {n}");
        assert_eq!(result.never_attempted, 0);
        assert!(!result.cancelled);
        assert_eq!(model.embed_calls(), n);
        assert_eq!(read_artifact(&path).await.unwrap().len(), result.written_count);
    }
}

#[tokio::test]
async fn test_cancel_before_dispatch_is_empty_success() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.csv");
    let model = Arc::new(MockLanguageModel::new(4));
    let pipeline = EmbeddingPipeline::new(model.clone(), workers(4));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = run(&pipeline, plots(12), &path, cancel).await;

    assert_eq!(result.written_count, 0);
    assert!(result.failures.is_empty());
    assert_eq!(result.dispatched, 0);
    assert_eq!(result.never_attempted, 12);
    assert!(result.cancelled);
    assert!(result.into_result().is_ok());
    assert_eq!(model.embed_calls(), 0);
    assert!(read_artifact(&path).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_worker_processes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.csv");
    let model = Arc::new(MockLanguageModel::new(4));
    let pipeline = EmbeddingPipeline::new(model.clone(), workers(1));

    let result = run(&pipeline, plots(9), &path, CancellationToken::new()).await;

    assert_eq!(result.written_count, 9);
    assert_eq!(model.max_concurrency(), 1);
    // One worker and one queue: arrival order is store order
    let ids: Vec<_> = read_artifact(&path)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.owner_id)
        .collect();
    assert_eq!(ids, (1..=9).map(|i| i.to_string()).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_concurrency_bounded_by_worker_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.csv");
    let model = Arc::new(MockLanguageModel::new(4).with_delay(Duration::from_millis(20)));
    let pipeline = EmbeddingPipeline::new(model.clone(), workers(3)).with_queue_capacity(8);

    let result = run(&pipeline, plots(12), &path, CancellationToken::new()).await;

    assert_eq!(result.written_count, 12);
    assert!(model.max_concurrency() <= 3);
    assert!(model.max_concurrency() >= 2);
}

#[tokio::test]
async fn test_abort_in_flight_fails_running_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.csv");
    let model = Arc::new(MockLanguageModel::new(4).with_delay(Duration::from_secs(30)));
    let pipeline = EmbeddingPipeline::new(model, workers(2)).with_abort_in_flight(true);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });
    let result = run(&pipeline, plots(10), &path, cancel).await;

    assert!(result.cancelled);
    assert_eq!(result.written_count, 0);
    assert_eq!(result.failure_count(), result.dispatched);
    assert!(result
        .failures
        .iter()
        .all(|f| f.cause == JobError::Cancelled));
    assert_eq!(result.dispatched + result.never_attempted, 10);
    assert!(read_artifact(&path).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_artifact_ingested_by_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.csv");
    let store = MockRecordStore::new()
        .with_import_dir(dir.path())
        .with_record("1", "Toy Story", "plot number 1")
        .with_record("2", "Heat", "plot number 2");
    let records = store.list_embeddable_records(false).await.unwrap();

    let model = Arc::new(MockLanguageModel::new(4));
    let pipeline = EmbeddingPipeline::new(model, workers(2));
    let result = run(&pipeline, records, &path, CancellationToken::new()).await;
    assert_eq!(result.written_count, 2);

    assert_eq!(store.import_artifact("embeddings.csv").await.unwrap(), 2);
    assert_eq!(store.count_embedded().await.unwrap(), 2);
    assert!(store
        .list_embeddable_records(false)
        .await
        .unwrap()
        .is_empty());
}
