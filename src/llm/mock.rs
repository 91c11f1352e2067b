//! Mock language model for tests
//!
//! Embeddings are derived from text hashes (same text → same vector), failures
//! and latency can be scripted per input text, and streamed generations replay
//! a fixed list of fragment lines.

use super::models::TransportError;
use super::traits::{FragmentLines, LanguageModel};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Scriptable in-process model.
///
/// # Example
///
/// ```rust
/// use knowledge_graph_rag::llm::{LanguageModel, MockLanguageModel, TransportError};
///
/// # tokio_test::block_on(async {
/// let model = MockLanguageModel::new(8).with_failure(
///     "slow plot",
///     TransportError::Timeout { url: "mock://embeddings".into() },
/// );
/// assert_eq!(model.embed("a plot").await.unwrap().len(), 8);
/// assert!(model.embed("slow plot").await.is_err());
/// assert_eq!(model.embed_calls(), 2);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MockLanguageModel {
    dimensions: usize,
    failures: HashMap<String, TransportError>,
    delays: HashMap<String, Duration>,
    default_delay: Option<Duration>,
    stream_lines: Vec<String>,
    embed_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl MockLanguageModel {
    /// Create a mock producing embeddings of the given length.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Default::default()
        }
    }

    /// Fail every embedding call for `text` with `error`.
    pub fn with_failure(mut self, text: &str, error: TransportError) -> Self {
        self.failures.insert(text.to_string(), error);
        self
    }

    /// Delay every embedding call for `text`.
    pub fn with_delay_for(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    /// Delay every embedding call that has no specific delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Lines replayed by `generate_stream`, one item each.
    pub fn with_stream_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Number of `embed` calls started so far.
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `embed` calls that were in flight at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// The prompt of the most recent generation call.
    pub async fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().await.clone()
    }

    fn hash_to_embedding(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            embedding.push(((hash as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32);
            let mut h = DefaultHasher::new();
            hash.hash(&mut h);
            hash = h.finish();
        }
        embedding
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, TransportError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(text).copied().or(self.default_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.failures.get(text) {
            Some(err) => Err(err.clone()),
            None => Ok(self.hash_to_embedding(text)),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, TransportError> {
        *self.last_prompt.lock().await = Some(prompt.to_string());
        let answer = self
            .stream_lines
            .iter()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|v| v.get("response").and_then(|r| r.as_str()).map(String::from))
            .collect();
        Ok(answer)
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentLines, TransportError> {
        *self.last_prompt.lock().await = Some(prompt.to_string());
        let lines: Vec<Result<String, TransportError>> =
            self.stream_lines.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(lines).boxed())
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
