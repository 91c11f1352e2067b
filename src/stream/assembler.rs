//! Incremental assembly of a streamed answer

use super::fragment::{decode_line, ResponseFragment, StreamLine, TerminalMetadata};
use crate::llm::TransportError;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// The complete answer of one generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledAnswer {
    pub full_text: String,
    pub metadata: TerminalMetadata,
}

/// Why a streamed answer could not be assembled.
///
/// Text already forwarded to the sink stays there; `forwarded` is its length in bytes.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("malformed fragment #{index} ({forwarded} bytes already forwarded): {source}")]
    Malformed {
        index: usize,
        forwarded: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("model reported an error: {0}")]
    Model(String),

    #[error("stream ended without a terminal fragment ({forwarded} bytes already forwarded)")]
    Truncated { forwarded: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to write answer to output: {0}")]
    Sink(#[source] std::io::Error),

    #[error("fragment received after the terminal fragment")]
    AfterTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Receiving,
    Done,
}

/// Two-state machine gated on the terminal fragment.
#[derive(Debug)]
pub struct StreamAssembler {
    state: AssemblerState,
    accumulated: String,
    fragments: usize,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self {
            state: AssemblerState::Receiving,
            accumulated: String::new(),
            fragments: 0,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Bytes forwarded to the sink so far.
    pub fn forwarded(&self) -> usize {
        self.accumulated.len()
    }

    /// Forward the fragment's text to `sink` and accumulate it.
    ///
    /// Returns the answer once the terminal fragment has been accepted.
    pub async fn accept<W>(
        &mut self,
        fragment: ResponseFragment,
        sink: &mut W,
    ) -> Result<Option<AssembledAnswer>, AssemblyError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.state == AssemblerState::Done {
            return Err(AssemblyError::AfterTerminal);
        }
        self.fragments += 1;

        if !fragment.text.is_empty() {
            sink.write_all(fragment.text.as_bytes())
                .await
                .map_err(AssemblyError::Sink)?;
            sink.flush().await.map_err(AssemblyError::Sink)?;
            self.accumulated.push_str(&fragment.text);
        }

        if !fragment.is_terminal {
            return Ok(None);
        }

        self.state = AssemblerState::Done;
        tracing::debug!(
            fragments = self.fragments,
            bytes = self.accumulated.len(),
            "Streamed answer complete"
        );
        Ok(Some(AssembledAnswer {
            full_text: std::mem::take(&mut self.accumulated),
            metadata: fragment.terminal_metadata.unwrap_or_default(),
        }))
    }
}

/// Consume a stream of raw fragment lines, echoing text to `sink` as it arrives.
///
/// Blank lines are skipped and nothing is read past the terminal fragment.
/// A newline is written to `sink` at the end whether or not assembly succeeded.
pub async fn assemble<S, W>(lines: S, sink: &mut W) -> Result<AssembledAnswer, AssemblyError>
where
    S: Stream<Item = Result<String, TransportError>> + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let assembled = read_fragments(lines, sink).await;

    let separator = async {
        sink.write_all(b"\n").await?;
        sink.flush().await
    }
    .await;

    match (assembled, separator) {
        (Ok(answer), Ok(())) => Ok(answer),
        (Ok(_), Err(e)) => Err(AssemblyError::Sink(e)),
        (Err(e), separator) => {
            if let Err(sep) = separator {
                tracing::debug!("Failed to write trailing newline: {}", sep);
            }
            Err(e)
        }
    }
}

async fn read_fragments<S, W>(mut lines: S, sink: &mut W) -> Result<AssembledAnswer, AssemblyError>
where
    S: Stream<Item = Result<String, TransportError>> + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut assembler = StreamAssembler::new();
    let mut index = 0;

    while let Some(line) = lines.next().await {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fragment = match decode_line(line) {
            Ok(StreamLine::Fragment(fragment)) => fragment,
            Ok(StreamLine::ModelError(message)) => return Err(AssemblyError::Model(message)),
            Err(source) => {
                return Err(AssemblyError::Malformed {
                    index,
                    forwarded: assembler.forwarded(),
                    source,
                })
            }
        };
        index += 1;

        if let Some(answer) = assembler.accept(fragment, sink).await? {
            return Ok(answer);
        }
    }

    Err(AssemblyError::Truncated {
        forwarded: assembler.forwarded(),
    })
}
