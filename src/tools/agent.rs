//! Agent control tool server: spawn, message, status, termination.
//!
//! The server holds a weak handle back to the network manager so a session
//! can reach its siblings without an ownership cycle; tool callbacks never
//! hold a direct handle to another agent.

use std::sync::Weak;

use agent_wire::ToolOutput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ToolDeclaration, ToolServer};
use crate::error::Result;
use crate::network::{AgentStatus, AgentType};

/// Snapshot of one agent for `listAgents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    pub status: AgentStatus,
    pub terminated: bool,
}

/// Manager operations reachable from agent tool calls.
///
/// The caller id identifies which agent invoked the tool; the manager
/// resolves it to a network and enforces the spawn-parent invariant.
#[async_trait]
pub trait AgentControl: Send + Sync {
    async fn spawn_agent(
        &self,
        caller_id: &str,
        agent_type: AgentType,
        name: &str,
        initial_prompt: &str,
        parent_id: Option<&str>,
    ) -> Result<String>;

    async fn send_message_to_agent(
        &self,
        caller_id: &str,
        target_id: &str,
        content: &str,
    ) -> Result<()>;

    async fn set_agent_status(&self, caller_id: &str, status: AgentStatus) -> Result<()>;

    async fn set_agent_task_name(&self, caller_id: &str, task_name: &str) -> Result<()>;

    async fn update_goal(&self, caller_id: &str, goal: &str) -> Result<()>;

    async fn terminate_agent(&self, caller_id: &str, target_id: &str, reason: &str) -> Result<()>;

    async fn list_agents(&self, caller_id: &str) -> Result<Vec<AgentSummary>>;
}

/// Tool server exposed to one agent's subprocess.
pub struct AgentToolServer {
    caller_id: String,
    control: Weak<dyn AgentControl>,
}

impl AgentToolServer {
    pub fn new(caller_id: impl Into<String>, control: Weak<dyn AgentControl>) -> Self {
        Self {
            caller_id: caller_id.into(),
            control,
        }
    }

    fn control(&self) -> std::result::Result<std::sync::Arc<dyn AgentControl>, ToolOutput> {
        self.control
            .upgrade()
            .ok_or_else(|| ToolOutput::error("network manager is no longer running"))
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> std::result::Result<&'a str, ToolOutput> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ToolOutput::error(format!("missing required argument: {}", key)))
}

#[async_trait]
impl ToolServer for AgentToolServer {
    fn name(&self) -> &str {
        "agent"
    }

    fn tools(&self) -> Vec<ToolDeclaration> {
        vec![
            ToolDeclaration::new(
                "spawnAgent",
                "Spawn a specialized sub-agent and send it an initial prompt",
                json!({
                    "type": "object",
                    "properties": {
                        "type": {"type": "string", "enum": ["implementation", "contextCollection", "planning", "tester", "userDefined"]},
                        "name": {"type": "string"},
                        "initialPrompt": {"type": "string"},
                        "parentId": {"type": "string"},
                    },
                    "required": ["type", "name", "initialPrompt"],
                }),
            ),
            ToolDeclaration::new(
                "sendMessageToAgent",
                "Enqueue a message into another agent's inbox",
                json!({
                    "type": "object",
                    "properties": {
                        "agentId": {"type": "string"},
                        "content": {"type": "string"},
                    },
                    "required": ["agentId", "content"],
                }),
            ),
            ToolDeclaration::new(
                "setAgentStatus",
                "Update this agent's reported status",
                json!({
                    "type": "object",
                    "properties": {
                        "status": {"type": "string", "enum": ["working", "waitingForAgent", "waitingForUser", "idle"]},
                    },
                    "required": ["status"],
                }),
            ),
            ToolDeclaration::new(
                "setAgentTaskName",
                "Set this agent's short task name for display",
                json!({
                    "type": "object",
                    "properties": {"taskName": {"type": "string"}},
                    "required": ["taskName"],
                }),
            ),
            ToolDeclaration::new(
                "setTaskName",
                "Set the network-wide goal",
                json!({
                    "type": "object",
                    "properties": {"taskName": {"type": "string"}},
                    "required": ["taskName"],
                }),
            ),
            ToolDeclaration::new(
                "terminateAgent",
                "Terminate an agent and release its resources",
                json!({
                    "type": "object",
                    "properties": {
                        "agentId": {"type": "string"},
                        "reason": {"type": "string"},
                    },
                    "required": ["agentId"],
                }),
            ),
            ToolDeclaration::new(
                "listAgents",
                "List the agents in this network with their statuses",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    async fn call(&self, tool: &str, args: Value) -> ToolOutput {
        let control = match self.control() {
            Ok(control) => control,
            Err(output) => return output,
        };

        let outcome = match tool {
            "spawnAgent" => {
                let type_text = match required_str(&args, "type") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                let Some(agent_type) = AgentType::parse(type_text) else {
                    return ToolOutput::error(format!("unknown agent type: {}", type_text));
                };
                let name = match required_str(&args, "name") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                let prompt = match required_str(&args, "initialPrompt") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                let parent_id = args.get("parentId").and_then(Value::as_str);
                control
                    .spawn_agent(&self.caller_id, agent_type, name, prompt, parent_id)
                    .await
                    .map(|agent_id| {
                        ToolOutput::text(format!("Spawned agent {} ({})", name, agent_id))
                    })
            }
            "sendMessageToAgent" => {
                let target = match required_str(&args, "agentId") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                let content = match required_str(&args, "content") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                control
                    .send_message_to_agent(&self.caller_id, target, content)
                    .await
                    .map(|_| ToolOutput::text(format!("Message enqueued for {}", target)))
            }
            "setAgentStatus" => {
                let status_text = match required_str(&args, "status") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                let Some(status) = AgentStatus::parse(status_text) else {
                    return ToolOutput::error(format!("unknown status: {}", status_text));
                };
                control
                    .set_agent_status(&self.caller_id, status)
                    .await
                    .map(|_| ToolOutput::text("Status updated"))
            }
            "setAgentTaskName" => {
                let task_name = match required_str(&args, "taskName") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                control
                    .set_agent_task_name(&self.caller_id, task_name)
                    .await
                    .map(|_| ToolOutput::text("Task name updated"))
            }
            "setTaskName" => {
                let goal = match required_str(&args, "taskName") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                control
                    .update_goal(&self.caller_id, goal)
                    .await
                    .map(|_| ToolOutput::text("Goal updated"))
            }
            "terminateAgent" => {
                let target = match required_str(&args, "agentId") {
                    Ok(value) => value,
                    Err(output) => return output,
                };
                let reason = args
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("terminated by agent request");
                control
                    .terminate_agent(&self.caller_id, target, reason)
                    .await
                    .map(|_| ToolOutput::text(format!("Terminated {}", target)))
            }
            "listAgents" => control.list_agents(&self.caller_id).await.map(|agents| {
                ToolOutput::text(
                    serde_json::to_string_pretty(&agents)
                        .unwrap_or_else(|_| "[]".to_string()),
                )
            }),
            other => return ToolOutput::error(format!("unknown tool: {}", other)),
        };

        outcome.unwrap_or_else(|err| ToolOutput::error(err.to_string()))
    }
}
