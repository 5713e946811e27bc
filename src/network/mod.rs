//! Agent network data model.
//!
//! A network is the root aggregate of one user task: a fixed working
//! directory, a mutable goal, and an ordered set of agents whose
//! spawner/spawnee edges form a DAG stored as a child→parent map.

pub mod manager;
pub mod persistence;

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentType {
    Main,
    Implementation,
    ContextCollection,
    Planning,
    Tester,
    UserDefined,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Main => "main",
            AgentType::Implementation => "implementation",
            AgentType::ContextCollection => "contextCollection",
            AgentType::Planning => "planning",
            AgentType::Tester => "tester",
            AgentType::UserDefined => "userDefined",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "main" => Some(AgentType::Main),
            "implementation" | "implementer" => Some(AgentType::Implementation),
            "contextCollection" | "context_collection" | "context" => {
                Some(AgentType::ContextCollection)
            }
            "planning" | "planner" => Some(AgentType::Planning),
            "tester" | "testing" => Some(AgentType::Tester),
            "userDefined" | "user_defined" | "custom" => Some(AgentType::UserDefined),
            _ => None,
        }
    }
}

/// Explicit agent status, merged with conversation state for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    Working,
    WaitingForAgent,
    WaitingForUser,
    #[default]
    Idle,
}

impl AgentStatus {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "working" => Some(AgentStatus::Working),
            "waitingForAgent" | "waiting_for_agent" => Some(AgentStatus::WaitingForAgent),
            "waitingForUser" | "waiting_for_user" => Some(AgentStatus::WaitingForUser),
            "idle" => Some(AgentStatus::Idle),
            _ => None,
        }
    }
}

/// Aggregated network status for UI titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkStatus {
    NeedsAttention,
    Working,
    Idle,
}

/// Metadata for one agent in a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    /// Explicit status as last reported by the agent itself.
    #[serde(default)]
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    pub configuration_id: String,
}

impl AgentMetadata {
    pub fn new(
        agent_type: AgentType,
        name: impl Into<String>,
        configuration_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_type,
            name: name.into(),
            task_name: None,
            status: AgentStatus::Idle,
            created_at: Utc::now(),
            terminated_at: None,
            termination_reason: None,
            configuration_id: configuration_id.into(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated_at.is_some()
    }
}

/// Root aggregate of a single user task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNetwork {
    pub id: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Fixed at creation; every contained agent inherits it.
    pub working_directory: PathBuf,
    /// Insertion order is display order; the first entry is the main agent.
    pub agents: Vec<AgentMetadata>,
    /// Child id → parent id. Roots (the main agent) are absent.
    #[serde(default)]
    pub parent_of: HashMap<String, String>,
}

impl AgentNetwork {
    pub fn new(goal: impl Into<String>, working_directory: impl Into<PathBuf>, main: AgentMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            created_at: now,
            last_active_at: now,
            working_directory: working_directory.into(),
            agents: vec![main],
            parent_of: HashMap::new(),
        }
    }

    pub fn main_agent(&self) -> &AgentMetadata {
        &self.agents[0]
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentMetadata> {
        self.agents.iter().find(|agent| agent.id == agent_id)
    }

    pub fn agent_mut(&mut self, agent_id: &str) -> Option<&mut AgentMetadata> {
        self.agents.iter_mut().find(|agent| agent.id == agent_id)
    }

    /// Register a spawned agent under its parent.
    pub fn add_agent(&mut self, agent: AgentMetadata, parent_id: &str) {
        self.parent_of
            .insert(agent.id.clone(), parent_id.to_string());
        self.agents.push(agent);
        self.touch();
    }

    pub fn parent_id(&self, agent_id: &str) -> Option<&String> {
        self.parent_of.get(agent_id)
    }

    /// Whether `ancestor_id` is on the parent chain of `agent_id`.
    pub fn is_descendant_of(&self, agent_id: &str, ancestor_id: &str) -> bool {
        let mut current = agent_id;
        while let Some(parent) = self.parent_of.get(current) {
            if parent == ancestor_id {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Live (non-terminated) agents in reverse spawn order, for shutdown.
    pub fn live_agents_reverse(&self) -> Vec<String> {
        self.agents
            .iter()
            .rev()
            .filter(|agent| !agent.is_terminated())
            .map(|agent| agent.id.clone())
            .collect()
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

/// Merge an agent's explicit status with its conversation state.
///
/// A processing conversation always shows as working; an idle conversation
/// downgrades a stale explicit `working` (the agent forgot to report back).
pub fn effective_status(explicit: AgentStatus, conversation_processing: bool) -> AgentStatus {
    if conversation_processing {
        AgentStatus::Working
    } else if explicit == AgentStatus::Working {
        AgentStatus::Idle
    } else {
        explicit
    }
}

/// Aggregate per-agent statuses into one network status.
pub fn aggregate_status(
    statuses: &[AgentStatus],
    attention_pending: bool,
) -> NetworkStatus {
    if attention_pending
        || statuses
            .iter()
            .any(|status| *status == AgentStatus::WaitingForUser)
    {
        NetworkStatus::NeedsAttention
    } else if statuses
        .iter()
        .any(|status| matches!(status, AgentStatus::Working | AgentStatus::WaitingForAgent))
    {
        NetworkStatus::Working
    } else {
        NetworkStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> AgentNetwork {
        let main = AgentMetadata::new(AgentType::Main, "Main", "orchestrator");
        AgentNetwork::new("build the app", "/work/app", main)
    }

    #[test]
    fn network_starts_with_single_root() {
        let network = network();
        assert_eq!(network.agents.len(), 1);
        assert_eq!(network.main_agent().agent_type, AgentType::Main);
        assert!(network.parent_of.is_empty());
    }

    #[test]
    fn spawned_agents_form_a_dag() {
        let mut network = network();
        let main_id = network.main_agent().id.clone();

        let implementer = AgentMetadata::new(AgentType::Implementation, "Impl", "implementer");
        let implementer_id = implementer.id.clone();
        network.add_agent(implementer, &main_id);

        let tester = AgentMetadata::new(AgentType::Tester, "Test", "tester");
        let tester_id = tester.id.clone();
        network.add_agent(tester, &implementer_id);

        assert_eq!(network.parent_id(&implementer_id), Some(&main_id));
        assert!(network.is_descendant_of(&tester_id, &main_id));
        assert!(network.is_descendant_of(&tester_id, &implementer_id));
        assert!(!network.is_descendant_of(&main_id, &tester_id));
    }

    #[test]
    fn reverse_spawn_order_for_shutdown() {
        let mut network = network();
        let main_id = network.main_agent().id.clone();
        let a = AgentMetadata::new(AgentType::Implementation, "A", "implementer");
        let a_id = a.id.clone();
        network.add_agent(a, &main_id);
        let b = AgentMetadata::new(AgentType::Tester, "B", "tester");
        let b_id = b.id.clone();
        network.add_agent(b, &main_id);

        assert_eq!(network.live_agents_reverse(), vec![b_id, a_id, main_id]);
    }

    #[test]
    fn effective_status_derivation() {
        // Processing conversation always reads as working.
        assert_eq!(
            effective_status(AgentStatus::Idle, true),
            AgentStatus::Working
        );
        // Idle conversation downgrades a stale explicit working.
        assert_eq!(
            effective_status(AgentStatus::Working, false),
            AgentStatus::Idle
        );
        // Otherwise the explicit value stands.
        assert_eq!(
            effective_status(AgentStatus::WaitingForUser, false),
            AgentStatus::WaitingForUser
        );
        assert_eq!(
            effective_status(AgentStatus::WaitingForAgent, false),
            AgentStatus::WaitingForAgent
        );
    }

    #[test]
    fn status_aggregation() {
        assert_eq!(
            aggregate_status(&[AgentStatus::Idle, AgentStatus::WaitingForUser], false),
            NetworkStatus::NeedsAttention
        );
        assert_eq!(
            aggregate_status(&[AgentStatus::Idle], true),
            NetworkStatus::NeedsAttention
        );
        assert_eq!(
            aggregate_status(&[AgentStatus::Idle, AgentStatus::Working], false),
            NetworkStatus::Working
        );
        assert_eq!(
            aggregate_status(&[AgentStatus::WaitingForAgent], false),
            NetworkStatus::Working
        );
        assert_eq!(
            aggregate_status(&[AgentStatus::Idle, AgentStatus::Idle], false),
            NetworkStatus::Idle
        );
    }

    #[test]
    fn json_round_trip_preserves_structure() {
        use pretty_assertions::assert_eq;

        let mut network = network();
        let main_id = network.main_agent().id.clone();
        let mut agent = AgentMetadata::new(AgentType::Planning, "Plan", "planner");
        agent.task_name = Some("plan the refactor".into());
        network.add_agent(agent, &main_id);

        let encoded = serde_json::to_string(&network).unwrap();
        let decoded: AgentNetwork = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, network.id);
        assert_eq!(decoded.goal, network.goal);
        assert_eq!(decoded.working_directory, network.working_directory);
        assert_eq!(decoded.agents.len(), network.agents.len());
        assert_eq!(decoded.parent_of, network.parent_of);
        assert_eq!(
            decoded.agents[1].task_name.as_deref(),
            Some("plan the refactor")
        );
    }
}
