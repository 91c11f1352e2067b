//! Outcome types flowing through the embedding pipeline

use crate::llm::TransportError;

/// The vector computed for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub owner_id: String,
    pub values: Vec<f32>,
}

/// Why one record ended without a row in the artifact.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to write artifact row: {0}")]
    Write(String),

    #[error("cancelled while the embedding call was in flight")]
    Cancelled,
}

/// A record that failed, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub record_id: String,
    pub cause: JobError,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.record_id, self.cause)
    }
}

/// Exactly one of these is produced per dispatched record.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(EmbeddingVector),
    Failure(JobFailure),
}

/// Final tally of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResult {
    /// Rows written to the artifact
    pub written_count: usize,
    /// Every failed record, in the order the failures were observed
    pub failures: Vec<JobFailure>,
    /// Records handed to the worker pool
    pub dispatched: usize,
    /// Records never handed to the worker pool because of cancellation
    pub never_attempted: usize,
    pub cancelled: bool,
}

impl AggregatedResult {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// No failures. A cancelled run can still be successful for what it attempted.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids of the failed records, ready to be retried on their own.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.record_id.as_str()).collect()
    }

    /// Turn a partially failed run into an error that enumerates every cause.
    pub fn into_result(self) -> Result<Self, super::PipelineError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(super::PipelineError::PartialFailure {
                written: self.written_count,
                failures: self.failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(id: &str) -> JobFailure {
        JobFailure {
            record_id: id.into(),
            cause: JobError::Transport(TransportError::Timeout {
                url: "http://localhost:8000/api/embeddings".into(),
            }),
        }
    }

    #[test]
    fn test_empty_result_is_success() {
        let result = AggregatedResult::default();
        assert!(result.is_success());
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_partial_failure_enumerates_every_cause() {
        let result = AggregatedResult {
            written_count: 2,
            failures: vec![failure("7"), failure("9")],
            dispatched: 4,
            ..Default::default()
        };
        assert_eq!(result.failed_ids(), vec!["7", "9"]);

        let err = result.into_result().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("2 written"), "{message}");
        assert!(message.contains("7: request to"), "{message}");
        assert!(message.contains("9: request to"), "{message}");
    }
}
