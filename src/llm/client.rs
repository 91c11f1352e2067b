//! HTTP transport for Ollama-compatible model servers
//!
//! The same client type serves both collaborators: the sentence-transformers
//! embedding service (`EMBEDDINGS_HOST`) and the generation model (`LLM_HOST`).
//! Both expose `POST /api/embeddings` with `{model, prompt}`.

use super::models::{
    EmbeddingRequest, EmbeddingResponse, ErrorResponse, GenerateRequest, GenerateResponse,
    TransportError,
};
use super::traits::{FragmentLines, LanguageModel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

const EMBEDDINGS_PATH: &str = "api/embeddings";
const GENERATE_PATH: &str = "api/generate";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client bound to one model on one server.
///
/// Thread-safe and cheaply cloneable (shares the reqwest connection pool).
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    dimensions: Option<usize>,
}

impl OllamaClient {
    /// Create a client for `model` served at `base_url`.
    ///
    /// `timeout` bounds every one-shot call. A streamed generation gets the same
    /// bound on the wait for response headers and on the gap between two lines,
    /// so a long answer keeps flowing while a stalled one fails.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build model HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            model: model.to_string(),
            timeout,
            dimensions: None,
        })
    }

    /// Reject embeddings whose length differs from `dimensions`.
    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Join the base address and an API path with exactly one slash.
    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut req = self.client.post(url).json(body);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let response = req
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let body = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(ErrorResponse {
                error: Some(message),
            }) => message,
            _ => body,
        };
        Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, TransportError> {
        let url = self.endpoint(EMBEDDINGS_PATH);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self.post(&url, &request, Some(self.timeout)).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        if parsed.embedding.is_empty() {
            return Err(TransportError::Decode {
                url,
                message: "response carried no embedding".into(),
            });
        }
        if let Some(expected) = self.dimensions {
            if parsed.embedding.len() != expected {
                return Err(TransportError::Decode {
                    url,
                    message: format!(
                        "embedding dimension mismatch: expected {}, got {} (model: {})",
                        expected,
                        parsed.embedding.len(),
                        self.model
                    ),
                });
            }
        }

        Ok(parsed.embedding)
    }

    async fn generate(&self, prompt: &str) -> Result<String, TransportError> {
        let url = self.endpoint(GENERATE_PATH);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self.post(&url, &request, Some(self.timeout)).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;
        Ok(parsed.response)
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentLines, TransportError> {
        let url = self.endpoint(GENERATE_PATH);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        let response = tokio::time::timeout(self.timeout, self.post(&url, &request, None))
            .await
            .map_err(|_| TransportError::Timeout { url: url.clone() })??;
        tracing::debug!(url = %url, model = %self.model, "generation stream opened");

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let lines = FramedRead::new(StreamReader::new(body), LinesCodec::new());
        Ok(bounded_lines(lines, url, self.timeout))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Turn decoded body lines into fragment lines, failing with
/// [`TransportError::Timeout`] when no line arrives within `idle`.
///
/// A timed-out read ends the stream after reporting the timeout.
fn bounded_lines<L>(lines: L, url: String, idle: Duration) -> FragmentLines
where
    L: Stream<Item = Result<String, LinesCodecError>> + Send + 'static,
{
    futures::stream::unfold(Some(Box::pin(lines)), move |state| {
        let url = url.clone();
        async move {
            let mut lines = state?;
            match tokio::time::timeout(idle, lines.next()).await {
                Ok(Some(Ok(line))) => Some((Ok(line), Some(lines))),
                Ok(Some(Err(e))) => Some((
                    Err(TransportError::Stream {
                        url,
                        message: e.to_string(),
                    }),
                    Some(lines),
                )),
                Ok(None) => None,
                Err(_) => {
                    tracing::warn!(url = %url, "generation stream stalled");
                    Some((Err(TransportError::Timeout { url }), None))
                }
            }
        }
    })
    .boxed()
}
