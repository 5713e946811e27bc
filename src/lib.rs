//! starling - agentic orchestration runtime
//!
//! Drives a network of cooperating assistant-CLI backed agents against a
//! single project directory. The host (a TUI or the bundled HTTP server)
//! talks to the [`network::manager::NetworkManager`]; everything else
//! hangs off it: per-agent sessions (the `agent-wire` crate), in-process
//! tool servers, the permission engine, durable memory, and the event
//! fanout.

pub mod agent;
pub mod ask_user;
pub mod config;
pub mod error;
pub mod git;
pub mod hooks;
pub mod memory;
pub mod network;
pub mod permission;
pub mod server;
pub mod telemetry;
pub mod tools;

pub use ask_user::{AskUserCoordinator, AskUserRequest};
pub use config::{Settings, StoragePaths};
pub use error::{Result, StarlingError};
pub use network::manager::{ManagerConfig, NetworkManager};
pub use network::{AgentNetwork, AgentStatus, AgentType, NetworkStatus};
pub use permission::{AskBehavior, Decision, PermissionEngine};
