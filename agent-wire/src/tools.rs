//! Tool invocation results and the collaborator traits the host injects.
//!
//! The session runtime never knows what a tool *does*; it forwards
//! subprocess control requests through these traits and relays whatever
//! comes back. Hosts wire concrete implementations at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    Image { media_type: String, data: String },
}

/// The result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Concatenated text content, for logging and protocol responses.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Dispatches `mcp_message` control requests to the named tool server.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Handle a raw protocol message addressed to `server_name`.
    ///
    /// Implementations report tool failures inside the returned value
    /// (`is_error` content); an `Err` here means the server itself is
    /// unknown or the message was unintelligible.
    async fn dispatch(&self, server_name: &str, message: Value) -> anyhow::Result<Value>;

    /// `(name, version)` pairs for the init frame.
    fn servers(&self) -> Vec<(String, String)>;
}

/// Reply to a `can_use_tool` control request.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionReply {
    Allow,
    Deny { message: String },
}

/// Decides whether the subprocess may invoke a tool.
#[async_trait]
pub trait PermissionResponder: Send + Sync {
    async fn can_use_tool(&self, tool_name: &str, input: &Value) -> PermissionReply;
}

/// Outcome of a hook callback. Hooks are opaque to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    /// Proceed unchanged.
    Continue,
    /// Block with a message surfaced to the subprocess.
    Block { reason: String },
}

/// Runs registered hook callbacks for `hook_callback` control requests.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, callback_id: &str, tool_use_id: Option<&str>, input: &Value)
        -> HookDecision;
}

/// Default hook runner with nothing registered: always continues.
#[derive(Debug, Default, Clone)]
pub struct NoHooks;

#[async_trait]
impl HookRunner for NoHooks {
    async fn run(&self, _: &str, _: Option<&str>, _: &Value) -> HookDecision {
        HookDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_skips_images() {
        let output = ToolOutput {
            content: vec![
                ToolContent::Text { text: "a".into() },
                ToolContent::Image {
                    media_type: "image/png".into(),
                    data: "xx".into(),
                },
                ToolContent::Text { text: "b".into() },
            ],
            is_error: false,
        };
        assert_eq!(output.text_content(), "ab");
    }

    #[test]
    fn error_constructor_sets_flag() {
        let output = ToolOutput::error("nope");
        assert!(output.is_error);
        assert_eq!(output.text_content(), "nope");
    }
}
