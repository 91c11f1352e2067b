//! Decoding of streamed generation lines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Summary fields the server attaches to the terminal fragment.
///
/// Every field is optional; anything not listed lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Token ids of the conversation, reusable as context for a follow-up request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One piece of a streamed answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseFragment {
    pub text: String,
    pub is_terminal: bool,
    /// Only present on the terminal fragment
    pub terminal_metadata: Option<TerminalMetadata>,
}

impl ResponseFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn terminal(text: impl Into<String>, metadata: TerminalMetadata) -> Self {
        Self {
            text: text.into(),
            is_terminal: true,
            terminal_metadata: Some(metadata),
        }
    }
}

/// A decoded stream line: either a fragment or an error reported by the model server.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLine {
    Fragment(ResponseFragment),
    ModelError(String),
}

#[derive(Debug, Deserialize)]
struct WireFragment {
    #[serde(default, alias = "text")]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Decode one newline-delimited JSON object of a generation stream.
pub fn decode_line(line: &str) -> serde_json::Result<StreamLine> {
    let wire: WireFragment = serde_json::from_str(line)?;

    if let Some(message) = wire.error {
        return Ok(StreamLine::ModelError(message));
    }

    let terminal_metadata = if wire.done {
        Some(serde_json::from_value(Value::Object(wire.rest))?)
    } else {
        None
    };

    Ok(StreamLine::Fragment(ResponseFragment {
        text: wire.response,
        is_terminal: wire.done,
        terminal_metadata,
    }))
}
