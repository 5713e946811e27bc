//! Task-app runtime tool server.
//!
//! Drives the guest application the agents are building: start, stop,
//! reload, restart, plus screenshot and UI actions delegated to a vision
//! backend. The backend is opaque to the core; every tool returns either an
//! ok text block or `isError` with a human-readable message.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use agent_wire::ToolOutput;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{ToolDeclaration, ToolServer};

/// Backend driving the guest app's UI through vision. Optional; hosts
/// without one get error results for the vision tools.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn screenshot(&self) -> anyhow::Result<String>;

    async fn perform_action(&self, description: &str) -> anyhow::Result<String>;
}

/// Process-level runtime for the guest task app.
pub struct AppToolServer {
    command: Vec<String>,
    working_directory: PathBuf,
    child: Mutex<Option<Child>>,
    vision: Option<Arc<dyn VisionBackend>>,
}

impl AppToolServer {
    pub fn new(command: Vec<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            command,
            working_directory: working_directory.into(),
            child: Mutex::new(None),
            vision: None,
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionBackend>) -> Self {
        self.vision = Some(vision);
        self
    }

    async fn start(&self) -> ToolOutput {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return ToolOutput::error("task app is already running");
            }
        }
        let Some(program) = self.command.first() else {
            return ToolOutput::error("no task app command configured");
        };
        match Command::new(program)
            .args(&self.command[1..])
            .current_dir(&self.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => {
                info!(program = %program, "task app started");
                *guard = Some(child);
                ToolOutput::text("Task app started")
            }
            Err(err) => ToolOutput::error(format!("failed to start task app: {}", err)),
        }
    }

    async fn stop(&self) -> ToolOutput {
        let mut guard = self.child.lock().await;
        match guard.take() {
            Some(mut child) => {
                if let Err(err) = child.start_kill() {
                    warn!(error = %err, "failed to kill task app");
                }
                let _ = child.wait().await;
                ToolOutput::text("Task app stopped")
            }
            None => ToolOutput::error("task app is not running"),
        }
    }

}

#[async_trait]
impl ToolServer for AppToolServer {
    fn name(&self) -> &str {
        "task-app"
    }

    fn tools(&self) -> Vec<ToolDeclaration> {
        let empty = json!({"type": "object", "properties": {}});
        vec![
            ToolDeclaration::new("startApp", "Start the guest task app", empty.clone()),
            ToolDeclaration::new("stopApp", "Stop the guest task app", empty.clone()),
            ToolDeclaration::new(
                "restartApp",
                "Stop and start the guest task app",
                empty.clone(),
            ),
            ToolDeclaration::new(
                "reloadApp",
                "Reload the guest task app in place",
                empty.clone(),
            ),
            ToolDeclaration::new(
                "captureScreenshot",
                "Capture a screenshot of the guest app",
                empty,
            ),
            ToolDeclaration::new(
                "performUiAction",
                "Perform a described UI action in the guest app",
                json!({
                    "type": "object",
                    "properties": {"action": {"type": "string"}},
                    "required": ["action"],
                }),
            ),
        ]
    }

    async fn call(&self, tool: &str, args: Value) -> ToolOutput {
        match tool {
            "startApp" => self.start().await,
            "stopApp" => self.stop().await,
            "restartApp" => {
                let _ = self.stop().await;
                self.start().await
            }
            // Restart covers reload until a hot-reload channel exists.
            "reloadApp" => {
                let _ = self.stop().await;
                self.start().await
            }
            "captureScreenshot" => match &self.vision {
                Some(vision) => match vision.screenshot().await {
                    Ok(text) => ToolOutput::text(text),
                    Err(err) => ToolOutput::error(err.to_string()),
                },
                None => ToolOutput::error("no vision backend configured"),
            },
            "performUiAction" => {
                let Some(action) = args.get("action").and_then(Value::as_str) else {
                    return ToolOutput::error("missing required argument: action");
                };
                let action = action.to_string();
                match &self.vision {
                    Some(vision) => match vision.perform_action(&action).await {
                        Ok(text) => ToolOutput::text(text),
                        Err(err) => ToolOutput::error(err.to_string()),
                    },
                    None => ToolOutput::error("no vision backend configured"),
                }
            }
            other => ToolOutput::error(format!("unknown tool: {}", other)),
        }
    }
}
