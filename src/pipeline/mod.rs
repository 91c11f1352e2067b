//! Concurrent embedding pipeline
//!
//! A dispatcher feeds records into a bounded job queue, a fixed pool of workers
//! embeds them, and the collector writes every success to the artifact while
//! keeping every failure. The outcome stream closes once all workers have been
//! joined, which is what ends collection.

pub mod artifact;
pub mod collector;
pub mod dispatch;
pub mod models;
pub mod worker;

pub use artifact::{ArtifactSink, CsvArtifact};
pub use dispatch::DispatchReport;
pub use models::*;

use crate::llm::LanguageModel;
use crate::store::CorpusRecord;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Failure of a whole embedding run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "embedding run partially failed: {written} written, {} failed: {}",
        .failures.len(),
        join_failures(.failures)
    )]
    PartialFailure {
        written: usize,
        failures: Vec<JobFailure>,
    },

    #[error("artifact error: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("embedding worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("dispatcher task failed: {0}")]
    Dispatch(String),
}

fn join_failures(failures: &[JobFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Fan-out/fan-in runner for embedding jobs.
pub struct EmbeddingPipeline {
    model: Arc<dyn LanguageModel>,
    workers: NonZeroUsize,
    queue_capacity: usize,
    abort_in_flight: bool,
}

impl EmbeddingPipeline {
    pub fn new(model: Arc<dyn LanguageModel>, workers: NonZeroUsize) -> Self {
        Self {
            model,
            workers,
            queue_capacity: 1,
            abort_in_flight: false,
        }
    }

    /// Capacity of the job queue (at least 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Race in-flight embedding calls against cancellation.
    pub fn with_abort_in_flight(mut self, abort: bool) -> Self {
        self.abort_in_flight = abort;
        self
    }

    /// Embed `records`, writing one artifact row per success.
    ///
    /// Per-record failures never stop the run: they are returned in the
    /// [`AggregatedResult`]. Use [`AggregatedResult::into_result`] to turn a
    /// partially failed run into an error.
    pub async fn run<A>(
        &self,
        records: Vec<CorpusRecord>,
        artifact: &mut A,
        cancel: CancellationToken,
    ) -> Result<AggregatedResult, PipelineError>
    where
        A: ArtifactSink + ?Sized,
    {
        let total = records.len();
        tracing::info!(
            records = total,
            workers = self.workers.get(),
            model = self.model.model_name(),
            "Starting embedding run"
        );

        let (job_tx, job_rx) = mpsc::channel(self.queue_capacity);
        let (outcome_tx, outcome_rx) = mpsc::channel(self.workers.get());

        let mut workers = worker::spawn_workers(
            self.workers,
            Arc::clone(&self.model),
            Arc::new(Mutex::new(job_rx)),
            &outcome_tx,
            cancel.clone(),
            self.abort_in_flight,
        );

        // Join barrier: the last sender goes away only after every worker has exited
        let supervisor = tokio::spawn(async move {
            let mut processed = 0;
            let mut panicked = None;
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(count) => processed += count,
                    Err(e) => {
                        tracing::error!("Embedding worker failed: {}", e);
                        panicked.get_or_insert_with(|| e.to_string());
                    }
                }
            }
            drop(outcome_tx);
            match panicked {
                Some(message) => Err(message),
                None => Ok(processed),
            }
        });

        let dispatcher = tokio::spawn(dispatch::dispatch_jobs(records, job_tx, cancel.clone()));

        let collected = collector::collect_outcomes(outcome_rx, artifact).await;

        let dispatch = dispatcher
            .await
            .map_err(|e| PipelineError::Dispatch(e.to_string()))?;
        let processed = supervisor
            .await
            .map_err(|e| PipelineError::WorkerPanicked(e.to_string()))?
            .map_err(PipelineError::WorkerPanicked)?;

        if processed != dispatch.dispatched || collected.outcomes() != dispatch.dispatched {
            tracing::warn!(
                dispatched = dispatch.dispatched,
                processed,
                outcomes = collected.outcomes(),
                "Outcome count does not match dispatched jobs"
            );
        }

        let result = AggregatedResult {
            written_count: collected.written,
            failures: collected.failures,
            dispatched: dispatch.dispatched,
            never_attempted: dispatch.skipped,
            cancelled: cancel.is_cancelled(),
        };

        tracing::info!(
            written = result.written_count,
            failed = result.failure_count(),
            never_attempted = result.never_attempted,
            cancelled = result.cancelled,
            "Embedding run finished"
        );
        Ok(result)
    }
}
