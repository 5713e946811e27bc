//! In-process tool servers and their dispatch fabric.
//!
//! Each server declares a name, a version and a set of tools with JSON
//! schemas; the subprocess reaches them through `mcp_message` control
//! requests carrying a JSON-RPC style payload (`tools/list`,
//! `tools/call`). Handlers never crash a session: failures come back as
//! `isError` results, and unexpected ones are reported to telemetry with
//! server, tool and agent tags.

pub mod agent;
pub mod app;
pub mod memory;
pub mod task;
pub mod vcs;

use std::collections::HashMap;
use std::sync::Arc;

use agent_wire::{ToolDispatcher, ToolOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::telemetry::{SharedTelemetry, TelemetryTags};

/// Declaration of one tool: name plus JSON schema for its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDeclaration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// One in-process tool server.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn tools(&self) -> Vec<ToolDeclaration>;

    /// Invoke one tool. Failures are reported inside the output, never as
    /// a panic or an `Err` that could abort the turn.
    async fn call(&self, tool: &str, args: Value) -> ToolOutput;
}

/// Per-session registry multiplexing servers over the control protocol.
pub struct ToolRegistry {
    agent_id: String,
    servers: HashMap<String, Arc<dyn ToolServer>>,
    telemetry: SharedTelemetry,
}

impl ToolRegistry {
    pub fn new(agent_id: impl Into<String>, telemetry: SharedTelemetry) -> Self {
        Self {
            agent_id: agent_id.into(),
            servers: HashMap::new(),
            telemetry,
        }
    }

    pub fn register(&mut self, server: Arc<dyn ToolServer>) {
        self.servers.insert(server.name().to_string(), server);
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    async fn handle_message(&self, server: &Arc<dyn ToolServer>, message: Value) -> Value {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match method {
            "initialize" => rpc_result(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": server.name(), "version": server.version()},
                }),
            ),
            "tools/list" => rpc_result(id, json!({"tools": server.tools()})),
            "tools/call" => {
                let params = message.get("params").cloned().unwrap_or(json!({}));
                let Some(tool) = params.get("name").and_then(Value::as_str) else {
                    return rpc_error(id, "missing tool name");
                };
                let args = params.get("arguments").cloned().unwrap_or(json!({}));

                debug!(
                    agent_id = %self.agent_id,
                    server = server.name(),
                    tool,
                    "tool invocation"
                );
                let output = server.call(tool, args).await;
                if output.is_error {
                    self.telemetry.record_error(
                        &output.text_content(),
                        &TelemetryTags::tool(&self.agent_id, server.name(), tool),
                    );
                }
                rpc_result(
                    id,
                    json!({
                        "content": output.content,
                        "isError": output.is_error,
                    }),
                )
            }
            other => {
                warn!(server = server.name(), method = other, "unknown tool method");
                rpc_error(id, &format!("unknown method: {}", other))
            }
        }
    }
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn rpc_error(id: Value, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32600, "message": message}})
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, server_name: &str, message: Value) -> anyhow::Result<Value> {
        let Some(server) = self.servers.get(server_name) else {
            anyhow::bail!("unknown tool server: {}", server_name);
        };
        Ok(self.handle_message(server, message).await)
    }

    fn servers(&self) -> Vec<(String, String)> {
        let mut servers: Vec<(String, String)> = self
            .servers
            .values()
            .map(|server| (server.name().to_string(), server.version().to_string()))
            .collect();
        servers.sort();
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::default_telemetry;

    struct EchoServer;

    #[async_trait]
    impl ToolServer for EchoServer {
        fn name(&self) -> &str {
            "echo"
        }

        fn tools(&self) -> Vec<ToolDeclaration> {
            vec![ToolDeclaration::new(
                "echo",
                "Echo the input back",
                json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            )]
        }

        async fn call(&self, tool: &str, args: Value) -> ToolOutput {
            match tool {
                "echo" => ToolOutput::text(
                    args.get("text").and_then(Value::as_str).unwrap_or_default(),
                ),
                other => ToolOutput::error(format!("unknown tool: {}", other)),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new("a1", default_telemetry());
        registry.register(Arc::new(EchoServer));
        registry
    }

    #[tokio::test]
    async fn lists_tools() {
        let registry = registry();
        let response = registry
            .dispatch("echo", json!({"id": 1, "method": "tools/list"}))
            .await
            .unwrap();
        assert_eq!(response["result"]["tools"][0]["name"], "echo");
    }

    #[tokio::test]
    async fn calls_tool_and_wraps_output() {
        let registry = registry();
        let response = registry
            .dispatch(
                "echo",
                json!({
                    "id": 2,
                    "method": "tools/call",
                    "params": {"name": "echo", "arguments": {"text": "hello"}},
                }),
            )
            .await
            .unwrap();
        assert_eq!(response["result"]["isError"], false);
        assert_eq!(response["result"]["content"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result_not_a_failure() {
        let registry = registry();
        let response = registry
            .dispatch(
                "echo",
                json!({"id": 3, "method": "tools/call", "params": {"name": "nope"}}),
            )
            .await
            .unwrap();
        assert_eq!(response["result"]["isError"], true);
    }

    #[tokio::test]
    async fn unknown_server_is_a_dispatch_error() {
        let registry = registry();
        assert!(registry.dispatch("missing", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn unknown_method_gets_rpc_error() {
        let registry = registry();
        let response = registry
            .dispatch("echo", json!({"id": 4, "method": "resources/list"}))
            .await
            .unwrap();
        assert!(response.get("error").is_some());
    }

    #[test]
    fn servers_are_listed_sorted() {
        let registry = registry();
        assert_eq!(
            ToolDispatcher::servers(&registry),
            vec![("echo".to_string(), "1.0.0".to_string())]
        );
    }
}
