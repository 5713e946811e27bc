//! The network manager: owns every live network and session.
//!
//! All cross-agent state changes funnel through this one place, so goal
//! updates serialize naturally (last writer wins, in manager order) and
//! every mutation is followed by an atomic snapshot write. Sessions reach
//! back into the manager through the [`AgentControl`] trait behind a weak
//! handle; there is no ownership cycle.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use agent_wire::events::{network_channel, NetworkSender};
use agent_wire::{
    spawn_process, spawn_session, AgentDescriptor, EventBus, EventStream, PermissionReply,
    PermissionResponder, SessionConfig, SessionDeps, SessionHandle,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::persistence::{NetworkRef, NetworkStore};
use super::{
    aggregate_status, effective_status, AgentMetadata, AgentNetwork, AgentStatus, AgentType,
    NetworkStatus,
};
use crate::agent::{AgentConfiguration, ConfigurationCatalog};
use crate::ask_user::AskUserCoordinator;
use crate::config::StoragePaths;
use crate::error::{Result, StarlingError};
use crate::hooks::HookRegistry;
use crate::memory::MemoryStore;
use crate::permission::{AskBehavior, Decision, PermissionEngine};
use crate::telemetry::{SharedTelemetry, TelemetryTags};
use crate::tools::agent::{AgentControl, AgentSummary, AgentToolServer};
use crate::tools::app::AppToolServer;
use crate::tools::memory::MemoryToolServer;
use crate::tools::task::TaskToolServer;
use crate::tools::vcs::VcsToolServer;
use crate::tools::ToolRegistry;

/// The tool servers this host ships.
pub const SHIPPED_SERVERS: [&str; 5] = ["agent", "memory", "task-management", "vcs", "task-app"];

/// Host-level manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Assistant CLI binary launched per agent.
    pub assistant_bin: String,
    pub ask_behavior: AskBehavior,
    /// Optional cap on a single turn.
    pub turn_timeout: Option<Duration>,
    /// Command line that starts the guest task app, when there is one.
    pub task_app_command: Option<Vec<String>>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            assistant_bin: "claude".to_string(),
            ask_behavior: AskBehavior::Ask,
            turn_timeout: None,
            task_app_command: None,
        }
    }
}

struct NetworkEntry {
    network: RwLock<AgentNetwork>,
    /// Network-wide mirror bus; main-agent subscribers listen here.
    bus: NetworkSender,
    engine: Arc<PermissionEngine>,
}

pub struct NetworkManager {
    weak_self: Weak<NetworkManager>,
    paths: StoragePaths,
    config: ManagerConfig,
    catalog: ConfigurationCatalog,
    networks: DashMap<String, Arc<NetworkEntry>>,
    sessions: DashMap<String, SessionHandle>,
    /// Agent id → owning network id.
    agent_networks: DashMap<String, String>,
    /// Persisted-but-not-hydrated networks from the startup index.
    persisted: DashMap<String, NetworkRef>,
    store: NetworkStore,
    memory: Arc<MemoryStore>,
    telemetry: SharedTelemetry,
    ask_user: Arc<AskUserCoordinator>,
    hooks: HookRegistry,
}

impl NetworkManager {
    /// Create a manager rooted at `paths`, eagerly indexing persisted
    /// networks for lazy hydration.
    pub fn new(paths: StoragePaths, config: ManagerConfig) -> Arc<Self> {
        Self::with_telemetry(paths, config, crate::telemetry::default_telemetry())
    }

    pub fn with_telemetry(
        paths: StoragePaths,
        config: ManagerConfig,
        telemetry: SharedTelemetry,
    ) -> Arc<Self> {
        let store = NetworkStore::new(paths.clone());
        let persisted = DashMap::new();
        for reference in store.index_all() {
            persisted.insert(reference.network_id.clone(), reference);
        }

        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            memory: Arc::new(MemoryStore::new(paths.clone())),
            store,
            paths,
            config,
            catalog: ConfigurationCatalog::builtin(),
            networks: DashMap::new(),
            sessions: DashMap::new(),
            agent_networks: DashMap::new(),
            persisted,
            telemetry,
            ask_user: Arc::new(AskUserCoordinator::new()),
            hooks: HookRegistry::new(),
        })
    }

    pub fn ask_user(&self) -> Arc<AskUserCoordinator> {
        Arc::clone(&self.ask_user)
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn memory(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.memory)
    }

    // ── Network lifecycle ───────────────────────────────────────────────

    /// Create a network with its main orchestrator agent and send the
    /// first user message.
    pub async fn create_network(
        &self,
        initial_message: &str,
        working_directory: &Path,
    ) -> Result<(String, String)> {
        if !working_directory.is_absolute() {
            return Err(StarlingError::config(format!(
                "working directory must be absolute: {}",
                working_directory.display()
            )));
        }

        let main = AgentMetadata::new(AgentType::Main, "Main", "orchestrator");
        let main_id = main.id.clone();
        let network = AgentNetwork::new(initial_message, working_directory, main);
        let network_id = network.id.clone();

        let engine = Arc::new(
            PermissionEngine::new(
                self.paths.clone(),
                working_directory,
                self.config.ask_behavior,
            )
            .with_internal_servers(SHIPPED_SERVERS),
        );
        let entry = Arc::new(NetworkEntry {
            network: RwLock::new(network),
            bus: network_channel(2048),
            engine,
        });
        self.networks.insert(network_id.clone(), Arc::clone(&entry));

        let configuration = self.configuration("orchestrator")?;
        let metadata = entry.network.read().await.main_agent().clone();
        let handle = match self
            .start_session(&network_id, &entry, &metadata, &configuration)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.networks.remove(&network_id);
                return Err(err);
            }
        };
        handle
            .send_message(initial_message, Vec::new())
            .map_err(|err| StarlingError::agent(&main_id, err.to_string()))?;

        self.persist(&entry).await?;
        info!(network_id = %network_id, main_agent = %main_id, "network created");
        Ok((network_id, main_id))
    }

    /// Append a user message to the main agent's inbox.
    pub async fn send_message(&self, network_id: &str, content: &str) -> Result<()> {
        let entry = self.entry(network_id)?;
        let main_id = {
            let mut network = entry.network.write().await;
            network.touch();
            network.main_agent().id.clone()
        };
        let handle = self.live_session(&main_id)?;
        handle
            .send_message(content, Vec::new())
            .map_err(|err| StarlingError::agent(&main_id, err.to_string()))?;
        self.persist(&entry).await
    }

    /// Subscribe to an agent's event stream. Subscribing to the main agent
    /// also delivers events from every descendant.
    pub async fn subscribe(&self, agent_id: &str) -> Result<EventStream> {
        let network_id = self.network_of(agent_id)?;
        let entry = self.entry(&network_id)?;
        let is_main = entry.network.read().await.main_agent().id == agent_id;

        if is_main {
            let descriptor = match self.sessions.get(agent_id) {
                Some(handle) => handle.bus().descriptor(),
                None => AgentDescriptor {
                    agent_id: agent_id.to_string(),
                    agent_type: AgentType::Main.as_str().to_string(),
                    agent_name: "Main".to_string(),
                    task_name: None,
                },
            };
            Ok(EventStream::from_receiver(entry.bus.subscribe(), descriptor))
        } else {
            let handle = self
                .sessions
                .get(agent_id)
                .ok_or_else(|| StarlingError::agent(agent_id, "no live session"))?;
            Ok(handle.subscribe())
        }
    }

    /// Snapshot of one network, hydrating from disk when needed.
    pub async fn get_network(&self, network_id: &str) -> Option<AgentNetwork> {
        if let Some(entry) = self.networks.get(network_id) {
            return Some(entry.network.read().await.clone());
        }
        self.hydrate(network_id).await
    }

    /// Ids of every known network, live or persisted.
    pub fn list_networks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.networks.iter().map(|e| e.key().clone()).collect();
        for reference in self.persisted.iter() {
            if !self.networks.contains_key(reference.key()) {
                ids.push(reference.key().clone());
            }
        }
        ids.sort();
        ids
    }

    pub async fn list_agents(&self, network_id: &str) -> Result<Vec<AgentSummary>> {
        let entry = self.entry(network_id)?;
        let network = entry.network.read().await;
        let mut summaries = Vec::with_capacity(network.agents.len());
        for agent in &network.agents {
            summaries.push(self.summarize(agent).await);
        }
        Ok(summaries)
    }

    /// Aggregate status for the UI title.
    pub async fn network_status(&self, network_id: &str) -> Result<NetworkStatus> {
        let entry = self.entry(network_id)?;
        let network = entry.network.read().await;
        let mut statuses = Vec::new();
        for agent in network.agents.iter().filter(|a| !a.is_terminated()) {
            statuses.push(self.effective(agent).await);
        }
        Ok(aggregate_status(&statuses, self.ask_user.has_pending()))
    }

    /// Terminate every agent in reverse spawn order and persist the final
    /// snapshot.
    pub async fn shutdown_network(&self, network_id: &str) -> Result<()> {
        let entry = self.entry(network_id)?;
        let order = entry.network.read().await.live_agents_reverse();
        for agent_id in order {
            if let Err(err) = self
                .terminate(&entry, &agent_id, "network shutdown")
                .await
            {
                warn!(agent_id = %agent_id, error = %err, "failed to terminate agent during shutdown");
            }
        }
        self.persist(&entry).await
    }

    /// Explicit user action: shut down and remove the network and its
    /// snapshot.
    pub async fn destroy_network(&self, network_id: &str) -> Result<()> {
        self.shutdown_network(network_id).await?;
        if let Some((_, entry)) = self.networks.remove(network_id) {
            let working_directory = entry.network.read().await.working_directory.clone();
            self.store.delete(&working_directory, network_id)?;
        }
        self.persisted.remove(network_id);
        info!(network_id = %network_id, "network destroyed");
        Ok(())
    }

    /// Shut down every live network (host exit).
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.networks.iter().map(|e| e.key().clone()).collect();
        for network_id in ids {
            if let Err(err) = self.shutdown_network(&network_id).await {
                warn!(network_id = %network_id, error = %err, "shutdown failed");
            }
        }
        self.ask_user.dispose();
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn entry(&self, network_id: &str) -> Result<Arc<NetworkEntry>> {
        self.networks
            .get(network_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StarlingError::network(network_id, "unknown network"))
    }

    fn network_of(&self, agent_id: &str) -> Result<String> {
        self.agent_networks
            .get(agent_id)
            .map(|id| id.clone())
            .ok_or_else(|| StarlingError::agent(agent_id, "unknown agent"))
    }

    fn live_session(&self, agent_id: &str) -> Result<SessionHandle> {
        let handle = self
            .sessions
            .get(agent_id)
            .map(|h| h.clone())
            .ok_or_else(|| StarlingError::agent(agent_id, "agent terminated"))?;
        if handle.is_dead() {
            return Err(StarlingError::agent(agent_id, "agent terminated"));
        }
        Ok(handle)
    }

    fn configuration(&self, id: &str) -> Result<AgentConfiguration> {
        self.catalog
            .get(id)
            .cloned()
            .ok_or_else(|| StarlingError::config(format!("unknown agent configuration: {}", id)))
    }

    async fn persist(&self, entry: &NetworkEntry) -> Result<()> {
        let network = entry.network.read().await;
        self.store.save(&network)
    }

    async fn hydrate(&self, network_id: &str) -> Option<AgentNetwork> {
        let reference = self.persisted.get(network_id)?.clone();
        match self.store.load(&reference.working_directory, network_id) {
            Ok(Some(network)) => {
                debug!(network_id = %network_id, "hydrated persisted network");
                let engine = Arc::new(
                    PermissionEngine::new(
                        self.paths.clone(),
                        &network.working_directory,
                        self.config.ask_behavior,
                    )
                    .with_internal_servers(SHIPPED_SERVERS),
                );
                let snapshot = network.clone();
                for agent in &network.agents {
                    self.agent_networks
                        .insert(agent.id.clone(), network_id.to_string());
                }
                self.networks.insert(
                    network_id.to_string(),
                    Arc::new(NetworkEntry {
                        network: RwLock::new(network),
                        bus: network_channel(2048),
                        engine,
                    }),
                );
                Some(snapshot)
            }
            Ok(None) => None,
            Err(err) => {
                self.telemetry
                    .record_error(&err.to_string(), &TelemetryTags::default());
                None
            }
        }
    }

    async fn summarize(&self, agent: &AgentMetadata) -> AgentSummary {
        AgentSummary {
            id: agent.id.clone(),
            agent_type: agent.agent_type,
            name: agent.name.clone(),
            task_name: agent.task_name.clone(),
            status: self.effective(agent).await,
            terminated: agent.is_terminated(),
        }
    }

    async fn effective(&self, agent: &AgentMetadata) -> AgentStatus {
        let handle = self.sessions.get(&agent.id).map(|h| h.clone());
        let processing = match handle {
            Some(handle) if !handle.is_dead() => handle.conversation().await.is_processing(),
            _ => false,
        };
        effective_status(agent.status, processing)
    }

    async fn start_session(
        &self,
        network_id: &str,
        entry: &Arc<NetworkEntry>,
        metadata: &AgentMetadata,
        configuration: &AgentConfiguration,
    ) -> Result<SessionHandle> {
        let agent_id = metadata.id.clone();
        let working_directory = entry.network.read().await.working_directory.clone();

        let descriptor = AgentDescriptor {
            agent_id: agent_id.clone(),
            agent_type: metadata.agent_type.as_str().to_string(),
            agent_name: metadata.name.clone(),
            task_name: metadata.task_name.clone(),
        };
        let bus = Arc::new(EventBus::new(descriptor).with_mirror(entry.bus.clone()));

        let control: Arc<dyn AgentControl> = self
            .weak_self
            .upgrade()
            .ok_or_else(|| StarlingError::network(network_id, "manager is shutting down"))?;
        let control = Arc::downgrade(&control);

        let mut registry = ToolRegistry::new(&agent_id, Arc::clone(&self.telemetry));
        for server in &configuration.tool_servers {
            match server.as_str() {
                "agent" => registry.register(Arc::new(AgentToolServer::new(
                    &agent_id,
                    control.clone(),
                ))),
                "memory" => registry.register(Arc::new(MemoryToolServer::new(
                    Arc::clone(&self.memory),
                    &working_directory,
                ))),
                "task-management" => registry.register(Arc::new(TaskToolServer::new(
                    &agent_id,
                    control.clone(),
                ))),
                "vcs" => registry.register(Arc::new(VcsToolServer::new(
                    crate::git::GitClient::new(&working_directory),
                ))),
                "task-app" => {
                    let command = self.config.task_app_command.clone().unwrap_or_default();
                    registry.register(Arc::new(AppToolServer::new(command, &working_directory)));
                }
                unknown => warn!(server = unknown, "unknown tool server in configuration"),
            }
        }

        let deps = SessionDeps {
            tools: Arc::new(registry),
            permissions: Arc::new(SessionPermissions {
                agent_id: agent_id.clone(),
                engine: Arc::clone(&entry.engine),
                ask_user: Arc::clone(&self.ask_user),
            }),
            hooks: Arc::new(self.hooks.clone()),
            bus,
        };

        let launch = configuration.launch_spec(&self.config.assistant_bin, &working_directory);
        let (stderr_tx, mut stderr_rx) = mpsc::unbounded_channel::<String>();
        {
            let telemetry = Arc::clone(&self.telemetry);
            let agent_id = agent_id.clone();
            tokio::spawn(async move {
                while let Some(line) = stderr_rx.recv().await {
                    telemetry.record_stderr(&agent_id, &line);
                }
            });
        }
        let io = spawn_process(&launch, Some(stderr_tx))
            .map_err(|err| StarlingError::agent(&agent_id, format!("{err:#}")))?;

        let mut session_config = SessionConfig::new(&agent_id);
        session_config.turn_timeout = self.config.turn_timeout;
        let handle = spawn_session(session_config, io, deps);

        self.sessions.insert(agent_id.clone(), handle.clone());
        self.agent_networks
            .insert(agent_id.clone(), network_id.to_string());
        info!(agent_id = %agent_id, network_id = %network_id, configuration = %configuration.id, "agent session started");
        Ok(handle)
    }

    async fn terminate(
        &self,
        entry: &Arc<NetworkEntry>,
        agent_id: &str,
        reason: &str,
    ) -> Result<()> {
        if let Some((_, handle)) = self.sessions.remove(agent_id) {
            handle.shutdown().await;
        }
        {
            let mut network = entry.network.write().await;
            let Some(agent) = network.agent_mut(agent_id) else {
                return Err(StarlingError::agent(agent_id, "unknown agent"));
            };
            if agent.terminated_at.is_none() {
                agent.terminated_at = Some(chrono::Utc::now());
                agent.termination_reason = Some(reason.to_string());
                agent.status = AgentStatus::Idle;
            }
            network.touch();
        }
        info!(agent_id = %agent_id, reason = %reason, "agent terminated");
        Ok(())
    }
}

/// Per-session permission responder bridging the engine and the ask-user
/// coordinator.
struct SessionPermissions {
    agent_id: String,
    engine: Arc<PermissionEngine>,
    ask_user: Arc<AskUserCoordinator>,
}

#[async_trait]
impl PermissionResponder for SessionPermissions {
    async fn can_use_tool(&self, tool_name: &str, input: &Value) -> PermissionReply {
        match self.engine.evaluate(tool_name, input) {
            Decision::Allow { reason } => {
                debug!(agent_id = %self.agent_id, tool = tool_name, reason = %reason, "allowed");
                PermissionReply::Allow
            }
            Decision::Deny { reason } => PermissionReply::Deny { message: reason },
            Decision::AskUser { pattern } => match self.engine.ask_behavior() {
                AskBehavior::Allow => PermissionReply::Allow,
                AskBehavior::Deny => PermissionReply::Deny {
                    message: "no interactive host available to approve this tool".to_string(),
                },
                AskBehavior::Ask => {
                    let question = format!(
                        "Allow agent {} to use {}? Suggested pattern: {}",
                        self.agent_id, tool_name, pattern
                    );
                    let answers = self.ask_user.ask_questions(vec![question.clone()]).await;
                    match answers.get(&question).map(String::as_str) {
                        Some("allow") | Some("yes") => PermissionReply::Allow,
                        Some("always") => {
                            self.engine.add_session_pattern(&pattern);
                            PermissionReply::Allow
                        }
                        _ => PermissionReply::Deny {
                            message: "denied by user".to_string(),
                        },
                    }
                }
            },
        }
    }
}

#[async_trait]
impl AgentControl for NetworkManager {
    async fn spawn_agent(
        &self,
        caller_id: &str,
        agent_type: AgentType,
        name: &str,
        initial_prompt: &str,
        parent_id: Option<&str>,
    ) -> Result<String> {
        let network_id = self.network_of(caller_id)?;
        let entry = self.entry(&network_id)?;
        let parent_id = parent_id.unwrap_or(caller_id);
        if parent_id != caller_id {
            let network = entry.network.read().await;
            if network.agent(parent_id).is_none() {
                return Err(StarlingError::agent(parent_id, "unknown agent"));
            }
        }
        // Spawning requires the parent to be running.
        self.live_session(parent_id)?;

        let configuration_id = self.catalog.id_for_type(agent_type);
        let configuration = self.configuration(configuration_id)?;
        let metadata = AgentMetadata::new(agent_type, name, configuration_id);
        let agent_id = metadata.id.clone();

        {
            let mut network = entry.network.write().await;
            network.add_agent(metadata.clone(), parent_id);
        }
        let handle = self
            .start_session(&network_id, &entry, &metadata, &configuration)
            .await?;
        handle
            .send_message(initial_prompt, Vec::new())
            .map_err(|err| StarlingError::agent(&agent_id, err.to_string()))?;

        self.persist(&entry).await?;
        Ok(agent_id)
    }

    async fn send_message_to_agent(
        &self,
        caller_id: &str,
        target_id: &str,
        content: &str,
    ) -> Result<()> {
        let network_id = self.network_of(caller_id)?;
        let entry = self.entry(&network_id)?;
        {
            let network = entry.network.read().await;
            let target = network
                .agent(target_id)
                .ok_or_else(|| StarlingError::agent(target_id, "unknown agent"))?;
            if target.is_terminated() {
                return Err(StarlingError::agent(target_id, "agent terminated"));
            }
        }
        let handle = self.live_session(target_id)?;
        handle
            .send_message(content, Vec::new())
            .map_err(|err| StarlingError::agent(target_id, err.to_string()))?;
        Ok(())
    }

    async fn set_agent_status(&self, caller_id: &str, status: AgentStatus) -> Result<()> {
        let network_id = self.network_of(caller_id)?;
        let entry = self.entry(&network_id)?;
        {
            let mut network = entry.network.write().await;
            let agent = network
                .agent_mut(caller_id)
                .ok_or_else(|| StarlingError::agent(caller_id, "unknown agent"))?;
            agent.status = status;
            network.touch();
        }
        self.persist(&entry).await
    }

    async fn set_agent_task_name(&self, caller_id: &str, task_name: &str) -> Result<()> {
        let network_id = self.network_of(caller_id)?;
        let entry = self.entry(&network_id)?;
        {
            let mut network = entry.network.write().await;
            let agent = network
                .agent_mut(caller_id)
                .ok_or_else(|| StarlingError::agent(caller_id, "unknown agent"))?;
            agent.task_name = Some(task_name.to_string());
            network.touch();
        }
        if let Some(handle) = self.sessions.get(caller_id) {
            handle.bus().set_task_name(Some(task_name.to_string()));
        }
        self.persist(&entry).await
    }

    /// Goal updates are serialized through the manager; when two agents
    /// race, the last write wins in lock order.
    async fn update_goal(&self, caller_id: &str, goal: &str) -> Result<()> {
        let network_id = self.network_of(caller_id)?;
        let entry = self.entry(&network_id)?;
        {
            let mut network = entry.network.write().await;
            network.goal = goal.to_string();
            network.touch();
        }
        self.persist(&entry).await
    }

    async fn terminate_agent(&self, caller_id: &str, target_id: &str, reason: &str) -> Result<()> {
        let network_id = self.network_of(caller_id)?;
        let entry = self.entry(&network_id)?;
        self.terminate(&entry, target_id, reason).await?;
        self.persist(&entry).await
    }

    async fn list_agents(&self, caller_id: &str) -> Result<Vec<AgentSummary>> {
        let network_id = self.network_of(caller_id)?;
        NetworkManager::list_agents(self, &network_id).await
    }
}
