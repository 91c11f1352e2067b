//! LanguageModel trait definition
//!
//! Async trait + Send + Sync so a single client can be shared by every
//! embedding worker through `Arc<dyn LanguageModel>`.

use super::models::TransportError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Raw newline-delimited fragment objects of one streamed generation, in arrival order.
///
/// Decoding is left to the consumer so that an undecodable line can be told apart
/// from a transport failure.
pub type FragmentLines = BoxStream<'static, Result<String, TransportError>>;

/// Abstract interface to a model-serving endpoint.
///
/// # Implementations
///
/// - [`OllamaClient`](super::OllamaClient): HTTP client for Ollama-style servers
/// - [`MockLanguageModel`](super::MockLanguageModel): in-process mock for tests
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Submit one text and receive its vector embedding.
    ///
    /// # Errors
    ///
    /// Network failures, timeouts, non-success statuses and undecodable bodies
    /// are all reported as [`TransportError`]; nothing is retried here.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, TransportError>;

    /// Submit a prompt and receive the whole answer in one response.
    async fn generate(&self, prompt: &str) -> Result<String, TransportError>;

    /// Submit a prompt and receive the answer as a stream of fragment lines.
    ///
    /// The returned error only covers establishing the call; failures while
    /// reading the body are yielded as stream items.
    async fn generate_stream(&self, prompt: &str) -> Result<FragmentLines, TransportError>;

    /// The model this client submits requests for.
    fn model_name(&self) -> &str;
}
