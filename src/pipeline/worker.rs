//! Worker pool: N tasks pulling records off the shared job queue

use super::models::{EmbeddingVector, JobError, JobFailure, JobOutcome};
use crate::llm::LanguageModel;
use crate::store::CorpusRecord;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Receiving end of the job queue, shared by every worker.
pub type SharedJobs = Arc<Mutex<mpsc::Receiver<CorpusRecord>>>;

/// Spawn `count` workers into a join set.
///
/// Each worker returns the number of jobs it processed. Workers hold clones of
/// `outcomes`; the caller keeps the original and drops it once the set is joined.
pub fn spawn_workers(
    count: NonZeroUsize,
    model: Arc<dyn LanguageModel>,
    jobs: SharedJobs,
    outcomes: &mpsc::Sender<JobOutcome>,
    cancel: CancellationToken,
    abort_in_flight: bool,
) -> JoinSet<usize> {
    let mut set = JoinSet::new();
    for worker_id in 0..count.get() {
        set.spawn(run_worker(
            worker_id,
            Arc::clone(&model),
            Arc::clone(&jobs),
            outcomes.clone(),
            cancel.clone(),
            abort_in_flight,
        ));
    }
    set
}

async fn run_worker(
    worker_id: usize,
    model: Arc<dyn LanguageModel>,
    jobs: SharedJobs,
    outcomes: mpsc::Sender<JobOutcome>,
    cancel: CancellationToken,
    abort_in_flight: bool,
) -> usize {
    let mut processed = 0;
    loop {
        // Hold the lock only while waiting for the next job
        let record = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(record) = record else { break };

        let outcome = embed_record(&*model, record, &cancel, abort_in_flight).await;
        if let JobOutcome::Failure(failure) = &outcome {
            tracing::warn!(
                worker = worker_id,
                record_id = %failure.record_id,
                error = %failure.cause,
                "Embedding job failed"
            );
        }
        processed += 1;

        if outcomes.send(outcome).await.is_err() {
            tracing::error!(worker = worker_id, "Outcome collector is gone, stopping");
            break;
        }
    }

    tracing::debug!(worker = worker_id, processed, "Worker finished");
    processed
}

async fn embed_record(
    model: &dyn LanguageModel,
    record: CorpusRecord,
    cancel: &CancellationToken,
    abort_in_flight: bool,
) -> JobOutcome {
    let result = if abort_in_flight {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobError::Cancelled),
            result = model.embed(&record.text) => result.map_err(JobError::from),
        }
    } else {
        model.embed(&record.text).await.map_err(JobError::from)
    };

    match result {
        Ok(values) => JobOutcome::Success(EmbeddingVector {
            owner_id: record.id,
            values,
        }),
        Err(cause) => JobOutcome::Failure(JobFailure {
            record_id: record.id,
            cause,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLanguageModel, TransportError};
    use std::time::Duration;

    fn queue(records: &[(&str, &str)]) -> SharedJobs {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for (id, text) in records {
            tx.try_send(CorpusRecord::new(*id, *text)).unwrap();
        }
        Arc::new(Mutex::new(rx))
    }

    async fn drain(mut rx: mpsc::Receiver<JobOutcome>) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_worker() {
        let model = Arc::new(MockLanguageModel::new(4).with_failure(
            "broken",
            TransportError::Timeout {
                url: "mock://embeddings".into(),
            },
        ));
        let jobs = queue(&[("1", "fine"), ("2", "broken"), ("3", "also fine")]);
        let (out_tx, out_rx) = mpsc::channel(4);

        let mut set = spawn_workers(
            NonZeroUsize::MIN,
            model,
            jobs,
            &out_tx,
            CancellationToken::new(),
            false,
        );
        drop(out_tx);

        let outcomes = drain(out_rx).await;
        let processed = set.join_next().await.unwrap().unwrap();
        assert_eq!(processed, 3);
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(&outcomes[1], JobOutcome::Failure(f) if f.record_id == "2"));
    }

    #[tokio::test]
    async fn test_abort_in_flight_reports_cancelled() {
        let model = Arc::new(MockLanguageModel::new(4).with_delay(Duration::from_secs(30)));
        let jobs = queue(&[("1", "slow")]);
        let (out_tx, out_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let mut set = spawn_workers(NonZeroUsize::MIN, model, jobs, &out_tx, cancel.clone(), true);
        drop(out_tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let outcomes = drain(out_rx).await;
        while set.join_next().await.is_some() {}
        assert_eq!(
            outcomes,
            vec![JobOutcome::Failure(JobFailure {
                record_id: "1".into(),
                cause: JobError::Cancelled,
            })]
        );
    }

    #[tokio::test]
    async fn test_in_flight_call_finishes_without_abort() {
        let model = Arc::new(MockLanguageModel::new(4).with_delay(Duration::from_millis(50)));
        let jobs = queue(&[("1", "slow")]);
        let (out_tx, out_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let _set = spawn_workers(NonZeroUsize::MIN, model, jobs, &out_tx, cancel.clone(), false);
        drop(out_tx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let outcomes = drain(out_rx).await;
        assert!(matches!(&outcomes[..], [JobOutcome::Success(v)] if v.owner_id == "1"));
    }
}
