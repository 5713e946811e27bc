//! Agent configurations: the immutable bundles sessions are launched from.

pub mod definition;

use std::collections::HashMap;
use std::path::Path;

use agent_wire::LaunchSpec;
use serde::{Deserialize, Serialize};

use crate::network::AgentType;

/// Permission mode handed to the assistant CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Immutable launch bundle for one kind of agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfiguration {
    pub id: String,
    pub system_prompt: String,
    /// Tool servers this agent's session exposes.
    pub tool_servers: Vec<String>,
    /// Optional restriction to specific tool names.
    pub allowed_tools: Option<Vec<String>>,
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl AgentConfiguration {
    pub fn new(id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            system_prompt: system_prompt.into(),
            tool_servers: vec!["agent".into(), "memory".into(), "task-management".into()],
            allowed_tools: None,
            model: None,
            permission_mode: PermissionMode::Default,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Build the CLI invocation for this configuration.
    pub fn launch_spec(&self, assistant_bin: &str, working_directory: &Path) -> LaunchSpec {
        let mut spec = LaunchSpec::new(assistant_bin, working_directory).args([
            "--input-format",
            "stream-json",
            "--output-format",
            "stream-json",
            "--verbose",
        ]);
        spec = spec.arg("--system-prompt").arg(&self.system_prompt);
        spec = spec
            .arg("--permission-mode")
            .arg(self.permission_mode.as_str());
        if let Some(model) = &self.model {
            spec = spec.arg("--model").arg(model);
        }
        if let Some(tools) = &self.allowed_tools {
            spec = spec.arg("--allowedTools").arg(tools.join(","));
        }
        spec
    }
}

/// The built-in configuration catalog plus any user-defined entries.
#[derive(Debug, Clone)]
pub struct ConfigurationCatalog {
    configurations: HashMap<String, AgentConfiguration>,
}

impl Default for ConfigurationCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConfigurationCatalog {
    /// The five shipped configurations.
    pub fn builtin() -> Self {
        let mut configurations = HashMap::new();
        for configuration in [
            orchestrator_configuration(),
            implementer_configuration(),
            context_collector_configuration(),
            planner_configuration(),
            tester_configuration(),
        ] {
            configurations.insert(configuration.id.clone(), configuration);
        }
        Self { configurations }
    }

    pub fn get(&self, id: &str) -> Option<&AgentConfiguration> {
        self.configurations.get(id)
    }

    pub fn insert(&mut self, configuration: AgentConfiguration) {
        self.configurations
            .insert(configuration.id.clone(), configuration);
    }

    /// The configuration id used when spawning an agent of a given type.
    pub fn id_for_type(&self, agent_type: AgentType) -> &'static str {
        match agent_type {
            AgentType::Main => "orchestrator",
            AgentType::Implementation => "implementer",
            AgentType::ContextCollection => "context-collector",
            AgentType::Planning => "planner",
            AgentType::Tester => "tester",
            AgentType::UserDefined => "user-defined",
        }
    }
}

fn orchestrator_configuration() -> AgentConfiguration {
    AgentConfiguration::new(
        "orchestrator",
        "You are the main orchestrator of a network of agents working on the \
         user's task. Break the task down, spawn specialized agents where \
         delegation helps, route their results, and keep the network goal \
         up to date. Prefer delegating implementation work over doing it \
         yourself.",
    )
    .with_servers(["agent", "memory", "task-management", "vcs", "task-app"])
}

fn implementer_configuration() -> AgentConfiguration {
    AgentConfiguration::new(
        "implementer",
        "You implement a concrete, well-scoped change. Stay within the task \
         you were given, report progress through your status, and message \
         your parent agent when you are done or blocked.",
    )
    .with_servers(["agent", "memory", "task-management", "vcs"])
}

fn context_collector_configuration() -> AgentConfiguration {
    AgentConfiguration::new(
        "context-collector",
        "You gather context: read code, search the project and summarize \
         what the requesting agent needs to know. You never modify files.",
    )
    .with_servers(["agent", "memory", "task-management"])
}

fn planner_configuration() -> AgentConfiguration {
    AgentConfiguration::new(
        "planner",
        "You produce a concrete plan for the given task: ordered steps, \
         files involved, risks. You do not implement anything.",
    )
    .with_servers(["agent", "memory", "task-management"])
}

fn tester_configuration() -> AgentConfiguration {
    AgentConfiguration::new(
        "tester",
        "You verify changes: run the relevant checks, drive the task app \
         when needed, and report exactly what passed and failed.",
    )
    .with_servers(["agent", "memory", "task-management", "vcs", "task-app"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_covers_all_types() {
        let catalog = ConfigurationCatalog::builtin();
        for agent_type in [
            AgentType::Main,
            AgentType::Implementation,
            AgentType::ContextCollection,
            AgentType::Planning,
            AgentType::Tester,
        ] {
            let id = catalog.id_for_type(agent_type);
            assert!(catalog.get(id).is_some(), "missing configuration {}", id);
        }
    }

    #[test]
    fn launch_spec_carries_configuration() {
        let configuration = AgentConfiguration::new("test", "do things")
            .with_model("sonnet");
        let spec = configuration.launch_spec("assistant", Path::new("/work"));

        assert_eq!(spec.program, "assistant");
        assert!(spec.args.contains(&"--system-prompt".to_string()));
        assert!(spec.args.contains(&"do things".to_string()));
        assert!(spec.args.contains(&"--model".to_string()));
        assert!(spec.args.contains(&"sonnet".to_string()));
        assert!(spec.args.contains(&"stream-json".to_string()));
    }

    #[test]
    fn allowed_tools_join_as_csv() {
        let mut configuration = AgentConfiguration::new("test", "p");
        configuration.allowed_tools = Some(vec!["Read".into(), "Grep".into()]);
        let spec = configuration.launch_spec("assistant", Path::new("/work"));
        assert!(spec.args.contains(&"Read,Grep".to_string()));
    }
}
