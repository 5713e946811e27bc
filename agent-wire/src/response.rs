//! Typed response events decoded from the assistant subprocess stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Token usage reported by a single response frame.
///
/// Totals on the conversation accumulate these; the current-context snapshot
/// is replaced by the most recent frame carrying usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    /// Extract usage from a raw `usage` JSON object, tolerating missing fields.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let get = |key: &str| obj.get(key).and_then(Value::as_u64).unwrap_or(0);
        Some(Self {
            input_tokens: get("input_tokens"),
            output_tokens: get("output_tokens"),
            cache_read_tokens: get("cache_read_input_tokens"),
            cache_creation_tokens: get("cache_creation_input_tokens"),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0
            && self.output_tokens == 0
            && self.cache_read_tokens == 0
            && self.cache_creation_tokens == 0
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }
}

/// One decoded event from the subprocess response stream.
///
/// The decoder maps every inbound frame onto exactly one of these variants;
/// frames it cannot classify are preserved as [`ResponseEvent::Unknown`] so
/// forward-compatible protocol additions survive logging without crashing
/// the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseEvent {
    Text {
        content: String,
        /// Streaming delta from a `content_block_delta` frame.
        is_partial: bool,
        /// Full-text snapshot from a cumulative `assistant` frame. Mutually
        /// exclusive with `is_partial`.
        is_cumulative: bool,
        /// Raw `stop_reason` when the frame carried one.
        stop_reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    ToolUse {
        tool_name: String,
        params: Value,
        tool_use_id: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Status {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Meta {
        session_id: Option<String>,
        metadata: HashMap<String, Value>,
    },
    Completion {
        stop_reason: String,
        usage: TokenUsage,
        cost_usd: Option<f64>,
    },
    CompactBoundary {
        trigger: String,
        pre_tokens: u64,
    },
    CompactSummary {
        content: String,
        transcript_only: bool,
    },
    UserMessage {
        content: String,
        is_replay: bool,
    },
    Unknown {
        raw: Value,
    },
}

impl ResponseEvent {
    /// Convenience constructor for plain sequential text.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            is_partial: false,
            is_cumulative: false,
            stop_reason: None,
            usage: None,
        }
    }

    /// Convenience constructor for a streaming delta.
    pub fn partial_text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            is_partial: true,
            is_cumulative: false,
            stop_reason: None,
            usage: None,
        }
    }

    /// Convenience constructor for a decode or runtime error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            details: None,
            code: None,
        }
    }

    /// Usage carried by this event, if any.
    pub fn usage(&self) -> Option<&TokenUsage> {
        match self {
            Self::Text { usage, .. } => usage.as_ref(),
            Self::Completion { usage, .. } => Some(usage),
            _ => None,
        }
    }

    /// Whether this event ends the current turn on its own.
    ///
    /// Partial frames never complete a turn.
    pub fn completes_turn(&self) -> bool {
        match self {
            Self::Completion { .. } => true,
            Self::Text {
                is_partial,
                stop_reason,
                ..
            } => !is_partial && stop_reason.as_deref() == Some("end_turn"),
            _ => false,
        }
    }
}
