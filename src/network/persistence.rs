//! Durable network snapshots.
//!
//! Every state-changing manager operation serializes the whole network to
//! `<root>/projects/<encoded>/networks/<id>.json`. On startup the store
//! walks the projects tree once to index what exists; snapshots hydrate
//! lazily on first access.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::AgentNetwork;
use crate::config::{decode_project_path, read_json, write_json_atomic, StoragePaths};
use crate::error::{Result, StarlingError};

/// Index entry for one persisted network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRef {
    pub network_id: String,
    pub working_directory: PathBuf,
    pub path: PathBuf,
}

pub struct NetworkStore {
    paths: StoragePaths,
}

impl NetworkStore {
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }

    pub fn save(&self, network: &AgentNetwork) -> Result<()> {
        let path = self
            .paths
            .network_path(&network.working_directory, &network.id);
        write_json_atomic(&path, network).map_err(|err| {
            StarlingError::persistence(format!("failed to persist network {}: {err:#}", network.id))
        })
    }

    pub fn load(&self, working_directory: &Path, network_id: &str) -> Result<Option<AgentNetwork>> {
        let path = self.paths.network_path(working_directory, network_id);
        read_json(&path).map_err(|err| {
            StarlingError::persistence(format!("failed to load network {}: {err:#}", network_id))
        })
    }

    pub fn delete(&self, working_directory: &Path, network_id: &str) -> Result<()> {
        let path = self.paths.network_path(working_directory, network_id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|err| {
                StarlingError::persistence(format!(
                    "failed to delete network snapshot {}: {}",
                    network_id, err
                ))
            })?;
        }
        Ok(())
    }

    /// Walk the projects tree and index every persisted network.
    /// Unreadable entries are skipped with a warning, never fatal.
    pub fn index_all(&self) -> Vec<NetworkRef> {
        let projects = self.paths.projects_dir();
        if !projects.exists() {
            return Vec::new();
        }

        let mut refs = Vec::new();
        for entry in WalkDir::new(&projects)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(parent) = path.parent() else {
                continue;
            };
            if parent.file_name().and_then(|n| n.to_str()) != Some("networks") {
                continue;
            }
            let encoded = parent
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str());
            let Some(encoded) = encoded else {
                continue;
            };
            let Some(working_directory) = decode_project_path(encoded) else {
                warn!(encoded, "skipping project dir with undecodable name");
                continue;
            };
            let Some(network_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            refs.push(NetworkRef {
                network_id: network_id.to_string(),
                working_directory,
                path: path.to_path_buf(),
            });
        }
        debug!(count = refs.len(), "indexed persisted networks");
        refs
    }
}
