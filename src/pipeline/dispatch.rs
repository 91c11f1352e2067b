//! Job source: feeds records into the bounded job queue

use crate::store::CorpusRecord;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the dispatcher did with the records it was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records accepted by the job queue
    pub dispatched: usize,
    /// Records left behind because of cancellation
    pub skipped: usize,
}

/// Enqueue every record in order, stopping as soon as `cancel` fires.
///
/// A full queue suspends dispatch; a cancellation that arrives while suspended
/// also stops it. The job queue closes when this returns and `jobs` is dropped.
pub async fn dispatch_jobs(
    records: Vec<CorpusRecord>,
    jobs: mpsc::Sender<CorpusRecord>,
    cancel: CancellationToken,
) -> DispatchReport {
    let total = records.len();
    let mut dispatched = 0;

    for record in records {
        if cancel.is_cancelled() {
            break;
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            result = jobs.send(record) => result.is_ok(),
        };
        if !sent {
            break;
        }
        dispatched += 1;
    }

    let report = DispatchReport {
        dispatched,
        skipped: total - dispatched,
    };
    if report.skipped > 0 {
        tracing::info!(
            dispatched = report.dispatched,
            skipped = report.skipped,
            "Dispatch stopped early"
        );
    } else {
        tracing::debug!(dispatched = report.dispatched, "All records dispatched");
    }
    report
}
