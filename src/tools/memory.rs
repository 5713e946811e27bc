//! Memory tool server: persistent project-scoped notes for agents.

use std::path::PathBuf;
use std::sync::Arc;

use agent_wire::ToolOutput;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ToolDeclaration, ToolServer};
use crate::memory::MemoryStore;

/// Exposes the durable key/value store to one session. The project scope
/// is fixed per server instance.
pub struct MemoryToolServer {
    store: Arc<MemoryStore>,
    project: PathBuf,
}

impl MemoryToolServer {
    pub fn new(store: Arc<MemoryStore>, project: impl Into<PathBuf>) -> Self {
        Self {
            store,
            project: project.into(),
        }
    }
}

#[async_trait]
impl ToolServer for MemoryToolServer {
    fn name(&self) -> &str {
        "memory"
    }

    fn tools(&self) -> Vec<ToolDeclaration> {
        let key_schema = json!({
            "type": "object",
            "properties": {"key": {"type": "string"}},
            "required": ["key"],
        });
        vec![
            ToolDeclaration::new(
                "memorySave",
                "Save a value under a key, replacing any previous value",
                json!({
                    "type": "object",
                    "properties": {
                        "key": {"type": "string"},
                        "value": {"type": "string"},
                    },
                    "required": ["key", "value"],
                }),
            ),
            ToolDeclaration::new("memoryRetrieve", "Retrieve a value by key", key_schema.clone()),
            ToolDeclaration::new("memoryDelete", "Delete a key", key_schema),
            ToolDeclaration::new(
                "memoryList",
                "List all keys stored for this project",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    async fn call(&self, tool: &str, args: Value) -> ToolOutput {
        let key = args.get("key").and_then(Value::as_str);
        match tool {
            "memorySave" => {
                let (Some(key), Some(value)) =
                    (key, args.get("value").and_then(Value::as_str))
                else {
                    return ToolOutput::error("memorySave requires key and value");
                };
                match self.store.save(&self.project, key, value).await {
                    Ok(()) => ToolOutput::text(format!("Saved '{}'", key)),
                    Err(err) => ToolOutput::error(err.to_string()),
                }
            }
            "memoryRetrieve" => {
                let Some(key) = key else {
                    return ToolOutput::error("memoryRetrieve requires key");
                };
                match self.store.retrieve(&self.project, key).await {
                    Ok(Some(entry)) => ToolOutput::text(entry.value),
                    Ok(None) => ToolOutput::error(format!("no memory stored for '{}'", key)),
                    Err(err) => ToolOutput::error(err.to_string()),
                }
            }
            "memoryDelete" => {
                let Some(key) = key else {
                    return ToolOutput::error("memoryDelete requires key");
                };
                match self.store.delete(&self.project, key).await {
                    Ok(true) => ToolOutput::text(format!("Deleted '{}'", key)),
                    Ok(false) => ToolOutput::error(format!("no memory stored for '{}'", key)),
                    Err(err) => ToolOutput::error(err.to_string()),
                }
            }
            "memoryList" => match self.store.list_keys(&self.project).await {
                Ok(keys) if keys.is_empty() => ToolOutput::text("No memories stored"),
                Ok(keys) => ToolOutput::text(keys.join("\n")),
                Err(err) => ToolOutput::error(err.to_string()),
            },
            other => ToolOutput::error(format!("unknown tool: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoragePaths;
    use tempfile::TempDir;

    fn server() -> (MemoryToolServer, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new(StoragePaths::new(dir.path())));
        (MemoryToolServer::new(store, "/work/app"), dir)
    }

    #[tokio::test]
    async fn save_retrieve_delete_cycle() {
        let (server, _dir) = server();

        let output = server
            .call("memorySave", json!({"key": "k", "value": "v"}))
            .await;
        assert!(!output.is_error);

        let output = server.call("memoryRetrieve", json!({"key": "k"})).await;
        assert_eq!(output.text_content(), "v");

        let output = server.call("memoryList", json!({})).await;
        assert_eq!(output.text_content(), "k");

        let output = server.call("memoryDelete", json!({"key": "k"})).await;
        assert!(!output.is_error);

        let output = server.call("memoryRetrieve", json!({"key": "k"})).await;
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn missing_arguments_report_errors() {
        let (server, _dir) = server();
        assert!(server.call("memorySave", json!({"key": "k"})).await.is_error);
        assert!(server.call("memoryRetrieve", json!({})).await.is_error);
        assert!(server.call("bogus", json!({})).await.is_error);
    }
}
