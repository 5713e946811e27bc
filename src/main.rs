//! Host binary: serve the HTTP/WebSocket surface over a manager.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use starling::network::manager::ManagerConfig;
use starling::{AskBehavior, NetworkManager, StoragePaths};

#[derive(Parser)]
#[command(name = "starling")]
#[command(about = "Agentic orchestration runtime for assistant-CLI backed agent networks")]
struct Args {
    /// Host to bind to (loopback only; there is no authentication)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "4170")]
    port: u16,

    /// Config root; defaults to the per-user config directory
    #[arg(long)]
    config_root: Option<std::path::PathBuf>,

    /// Assistant CLI binary launched per agent
    #[arg(long, default_value = "claude")]
    assistant_bin: String,

    /// What to do when a tool needs interactive approval
    #[arg(long, value_enum, default_value = "deny")]
    permissions: PermissionBehavior,
}

#[derive(Clone, Copy, ValueEnum)]
enum PermissionBehavior {
    Ask,
    Deny,
    Allow,
}

impl From<PermissionBehavior> for AskBehavior {
    fn from(behavior: PermissionBehavior) -> Self {
        match behavior {
            PermissionBehavior::Ask => AskBehavior::Ask,
            PermissionBehavior::Deny => AskBehavior::Deny,
            PermissionBehavior::Allow => AskBehavior::Allow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let paths = match args.config_root {
        Some(root) => StoragePaths::new(root),
        None => StoragePaths::default_root("http"),
    };

    let manager = NetworkManager::new(
        paths,
        ManagerConfig {
            assistant_bin: args.assistant_bin,
            ask_behavior: args.permissions.into(),
            ..Default::default()
        },
    );

    let bind_addr = format!("{}:{}", args.host, args.port);
    let serve = starling::server::serve(Arc::clone(&manager), &bind_addr);

    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            manager.shutdown().await;
        }
    }
    Ok(())
}
