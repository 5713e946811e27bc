//! Task-management tool server: goal and task-name setters.
//!
//! Alias paths to the same manager operations the agent server exposes,
//! kept as their own server so restricted configurations can grant naming
//! without agent control.

use std::sync::Weak;

use agent_wire::ToolOutput;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::agent::AgentControl;
use super::{ToolDeclaration, ToolServer};

pub struct TaskToolServer {
    caller_id: String,
    control: Weak<dyn AgentControl>,
}

impl TaskToolServer {
    pub fn new(caller_id: impl Into<String>, control: Weak<dyn AgentControl>) -> Self {
        Self {
            caller_id: caller_id.into(),
            control,
        }
    }
}

#[async_trait]
impl ToolServer for TaskToolServer {
    fn name(&self) -> &str {
        "task-management"
    }

    fn tools(&self) -> Vec<ToolDeclaration> {
        let name_schema = json!({
            "type": "object",
            "properties": {"taskName": {"type": "string"}},
            "required": ["taskName"],
        });
        vec![
            ToolDeclaration::new(
                "setTaskName",
                "Set the network-wide goal shown in the UI title",
                name_schema.clone(),
            ),
            ToolDeclaration::new(
                "setAgentTaskName",
                "Set this agent's own task name",
                name_schema,
            ),
        ]
    }

    async fn call(&self, tool: &str, args: Value) -> ToolOutput {
        let Some(control) = self.control.upgrade() else {
            return ToolOutput::error("network manager is no longer running");
        };
        let Some(task_name) = args.get("taskName").and_then(Value::as_str) else {
            return ToolOutput::error("missing required argument: taskName");
        };

        let outcome = match tool {
            "setTaskName" => control.update_goal(&self.caller_id, task_name).await,
            "setAgentTaskName" => {
                control
                    .set_agent_task_name(&self.caller_id, task_name)
                    .await
            }
            other => return ToolOutput::error(format!("unknown tool: {}", other)),
        };
        match outcome {
            Ok(()) => ToolOutput::text("Updated"),
            Err(err) => ToolOutput::error(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::network::{AgentStatus, AgentType};
    use crate::tools::agent::AgentSummary;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingControl {
        goals: Mutex<Vec<String>>,
        task_names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AgentControl for RecordingControl {
        async fn spawn_agent(
            &self,
            _caller_id: &str,
            _agent_type: AgentType,
            _name: &str,
            _initial_prompt: &str,
            _parent_id: Option<&str>,
        ) -> Result<String> {
            Ok("unused".to_string())
        }

        async fn send_message_to_agent(
            &self,
            _caller_id: &str,
            _target_id: &str,
            _content: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn set_agent_status(&self, _caller_id: &str, _status: AgentStatus) -> Result<()> {
            Ok(())
        }

        async fn set_agent_task_name(&self, _caller_id: &str, task_name: &str) -> Result<()> {
            self.task_names.lock().await.push(task_name.to_string());
            Ok(())
        }

        async fn update_goal(&self, _caller_id: &str, goal: &str) -> Result<()> {
            self.goals.lock().await.push(goal.to_string());
            Ok(())
        }

        async fn terminate_agent(
            &self,
            _caller_id: &str,
            _target_id: &str,
            _reason: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn list_agents(&self, _caller_id: &str) -> Result<Vec<AgentSummary>> {
            Ok(vec![])
        }
    }

    fn server(control: &Arc<RecordingControl>) -> TaskToolServer {
        let control: Arc<dyn AgentControl> = control.clone();
        TaskToolServer::new("caller", Arc::downgrade(&control))
    }

    #[tokio::test]
    async fn setters_route_to_the_manager() {
        let control = Arc::new(RecordingControl::default());
        let server = server(&control);

        let output = server
            .call("setTaskName", json!({"taskName": "ship the feature"}))
            .await;
        assert!(!output.is_error, "{:?}", output);

        let output = server
            .call("setAgentTaskName", json!({"taskName": "wiring the API"}))
            .await;
        assert!(!output.is_error, "{:?}", output);

        assert_eq!(*control.goals.lock().await, vec!["ship the feature"]);
        assert_eq!(*control.task_names.lock().await, vec!["wiring the API"]);
    }

    #[tokio::test]
    async fn missing_task_name_is_a_validation_error() {
        let control = Arc::new(RecordingControl::default());
        let server = server(&control);

        let output = server.call("setTaskName", json!({})).await;
        assert!(output.is_error);
        assert!(output.text_content().contains("taskName"));

        let output = server.call("bogusTool", json!({"taskName": "x"})).await;
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn dropped_manager_reports_cleanly() {
        let control: Arc<dyn AgentControl> = Arc::new(RecordingControl::default());
        let weak = Arc::downgrade(&control);
        drop(control);
        let server = TaskToolServer::new("caller", weak);

        let output = server.call("setTaskName", json!({"taskName": "x"})).await;
        assert!(output.is_error);
        assert!(output.text_content().contains("no longer running"));
    }
}
