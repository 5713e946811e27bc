//! Wire frames for the bidirectional subprocess control protocol.
//!
//! Both directions are line-delimited JSON. Outbound frames are user
//! messages and control responses; inbound frames are control requests and
//! the response events handled by [`crate::decoder`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single content block inside a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

/// Base64 image payload attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source_type: "base64".to_string(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// An image attachment supplied alongside user text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

/// Build the outbound user-message frame:
/// `{"type":"user","message":{"role":"user","content":[...]}}`.
pub fn user_message_frame(text: &str, attachments: &[Attachment]) -> Value {
    let mut content = vec![json!({"type": "text", "text": text})];
    for attachment in attachments {
        content.push(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": attachment.media_type,
                "data": attachment.data,
            }
        }));
    }
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": content,
        }
    })
}

/// Build the init frame registering the tool servers this session exposes.
pub fn init_frame(servers: &[(String, String)]) -> Value {
    let listed: Vec<Value> = servers
        .iter()
        .map(|(name, version)| json!({"name": name, "version": version}))
        .collect();
    json!({
        "type": "control_request",
        "request_id": "init",
        "request": {
            "subtype": "initialize",
            "mcp_servers": listed,
        }
    })
}

/// A control request initiated by the subprocess.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlRequest {
    pub request_id: String,
    pub request: ControlRequestBody,
}

/// The body of a control request, keyed on `subtype`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequestBody {
    CanUseTool {
        tool_name: String,
        input: Value,
        #[serde(default)]
        permission_suggestions: Option<Value>,
        #[serde(default)]
        blocked_path: Option<String>,
    },
    HookCallback {
        callback_id: String,
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        input: Value,
    },
    McpMessage {
        server_name: String,
        message: Value,
    },
    /// Forward-compatible catch-all; replied to with a protocol error.
    #[serde(other)]
    Unknown,
}

impl ControlRequest {
    /// Parse a raw frame already known to have `type == "control_request"`.
    pub fn from_frame(frame: &Value) -> Option<Self> {
        serde_json::from_value(frame.clone()).ok()
    }
}

/// Build a successful control response.
pub fn control_response_ok(request_id: &str, response: Value) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        }
    })
}

/// Build a failed control response.
pub fn control_response_err(request_id: &str, error: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": error,
        }
    })
}

/// Permission reply payloads for `can_use_tool`.
pub fn permission_allow() -> Value {
    json!({"behavior": "allow", "updatedInput": Value::Null})
}

pub fn permission_allow_with_input(updated_input: Value) -> Value {
    json!({"behavior": "allow", "updatedInput": updated_input})
}

pub fn permission_deny(message: &str) -> Value {
    json!({"behavior": "deny", "message": message})
}
