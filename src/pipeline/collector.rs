//! Outcome collector: the single writer of the artifact

use super::artifact::{format_row, is_representable_id, ArtifactSink};
use super::models::{JobError, JobFailure, JobOutcome};
use tokio::sync::mpsc;

/// What the collector saw before the outcome stream closed.
#[derive(Debug, Default)]
pub struct CollectorReport {
    pub written: usize,
    pub failures: Vec<JobFailure>,
}

impl CollectorReport {
    pub fn outcomes(&self) -> usize {
        self.written + self.failures.len()
    }
}

/// Drain `outcomes` until every sender is gone.
///
/// Successes become artifact rows. A row that cannot be written, or whose id
/// cannot be represented in the CSV, is recorded as a failure of that record and
/// the remaining outcomes are still processed.
pub async fn collect_outcomes<A>(
    mut outcomes: mpsc::Receiver<JobOutcome>,
    artifact: &mut A,
) -> CollectorReport
where
    A: ArtifactSink + ?Sized,
{
    let mut report = CollectorReport::default();

    while let Some(outcome) = outcomes.recv().await {
        match outcome {
            JobOutcome::Success(vector) if !is_representable_id(&vector.owner_id) => {
                tracing::warn!(
                    record_id = %vector.owner_id,
                    "Record id not representable in artifact"
                );
                report.failures.push(JobFailure {
                    record_id: vector.owner_id,
                    cause: JobError::Write("record id not representable in artifact".into()),
                });
            }
            JobOutcome::Success(vector) => match artifact.append_row(&format_row(&vector)).await {
                Ok(()) => {
                    report.written += 1;
                    if report.written % 100 == 0 {
                        tracing::info!(written = report.written, "Embeddings written");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        record_id = %vector.owner_id,
                        error = %e,
                        "Failed to write artifact row"
                    );
                    report.failures.push(JobFailure {
                        record_id: vector.owner_id,
                        cause: JobError::Write(e.to_string()),
                    });
                }
            },
            JobOutcome::Failure(failure) => report.failures.push(failure),
        }
    }

    report
}
