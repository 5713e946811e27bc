//! Project-scoped persistent key/value memory.
//!
//! Entries live in one `memory.json` per project (project = absolute
//! working directory). Writers to the same project serialize through an
//! in-process mutex; writes are temp-file + rename so a crash never leaves
//! a torn file. Reads go straight to disk and never contend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{read_json, write_json_atomic, StoragePaths};
use crate::error::{Result, StarlingError};

/// One stored memory value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

type MemoryFile = BTreeMap<String, MemoryEntry>;

/// Durable memory store keyed by project.
pub struct MemoryStore {
    paths: StoragePaths,
    /// Per-project writer locks; cross-project writes are independent.
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl MemoryStore {
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            locks: DashMap::new(),
        }
    }

    /// Upsert a key. The key must be non-empty.
    pub async fn save(&self, project: &Path, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(StarlingError::config("memory key must not be empty"));
        }
        let lock = self.project_lock(project);
        let _guard = lock.lock().await;

        let path = self.paths.memory_path(project);
        let mut entries = load_entries(&path)?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );
        write_json_atomic(&path, &entries)
            .map_err(|err| StarlingError::persistence(format!("failed to save memory: {err:#}")))?;
        debug!(project = %project.display(), key = %key, "memory saved");
        Ok(())
    }

    /// Fetch one entry; `None` when absent.
    pub async fn retrieve(&self, project: &Path, key: &str) -> Result<Option<MemoryEntry>> {
        let path = self.paths.memory_path(project);
        let entries = load_entries(&path)?;
        Ok(entries.get(key).cloned())
    }

    /// Remove a key; returns whether it existed.
    pub async fn delete(&self, project: &Path, key: &str) -> Result<bool> {
        let lock = self.project_lock(project);
        let _guard = lock.lock().await;

        let path = self.paths.memory_path(project);
        let mut entries = load_entries(&path)?;
        let existed = entries.remove(key).is_some();
        if existed {
            write_json_atomic(&path, &entries).map_err(|err| {
                StarlingError::persistence(format!("failed to delete memory: {err:#}"))
            })?;
        }
        Ok(existed)
    }

    /// All keys for a project, sorted.
    pub async fn list_keys(&self, project: &Path) -> Result<Vec<String>> {
        let path = self.paths.memory_path(project);
        let entries = load_entries(&path)?;
        Ok(entries.keys().cloned().collect())
    }

    fn project_lock(&self, project: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(project.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn load_entries(path: &Path) -> Result<MemoryFile> {
    match read_json::<MemoryFile>(path) {
        Ok(Some(entries)) => Ok(entries),
        Ok(None) => Ok(MemoryFile::new()),
        Err(err) => Err(StarlingError::persistence(format!(
            "failed to read memory file: {err:#}"
        ))),
    }
}
