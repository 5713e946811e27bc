//! On-disk layout and per-project settings.
//!
//! Everything lives under a host-configured root so TUI and HTTP hosts do
//! not collide:
//!
//! ```text
//! <root>/projects/<encoded-abs-path>/memory.json
//! <root>/projects/<encoded-abs-path>/networks/<id>.json
//! <root>/projects/<encoded-abs-path>/settings.local.json
//! ```
//!
//! Project directories encode the absolute working-directory path with URL
//! escaping so one flat directory level maps back to real paths.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Root of the persistence layout.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Host default: `<config_dir>/starling/<host>`.
    pub fn default_root(host: &str) -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: base.join("starling").join(host),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// Directory for one project, keyed by its absolute working directory.
    pub fn project_dir(&self, working_directory: &Path) -> PathBuf {
        let encoded = encode_project_path(working_directory);
        self.projects_dir().join(encoded)
    }

    pub fn memory_path(&self, working_directory: &Path) -> PathBuf {
        self.project_dir(working_directory).join("memory.json")
    }

    pub fn networks_dir(&self, working_directory: &Path) -> PathBuf {
        self.project_dir(working_directory).join("networks")
    }

    pub fn network_path(&self, working_directory: &Path, network_id: &str) -> PathBuf {
        self.networks_dir(working_directory)
            .join(format!("{}.json", network_id))
    }

    pub fn settings_path(&self, working_directory: &Path) -> PathBuf {
        self.project_dir(working_directory)
            .join("settings.local.json")
    }
}

/// Encode an absolute path into a single flat filename.
pub fn encode_project_path(path: &Path) -> String {
    urlencoding::encode(&path.to_string_lossy()).into_owned()
}

/// Recover the absolute path from an encoded project directory name.
pub fn decode_project_path(encoded: &str) -> Option<PathBuf> {
    urlencoding::decode(encoded)
        .ok()
        .map(|decoded| PathBuf::from(decoded.into_owned()))
}

/// Permission pattern lists from `settings.local.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PermissionSettings {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub ask: Vec<String>,
}

/// Per-project settings.
///
/// Hook configuration is host-defined and passes through opaquely; unknown
/// top-level keys survive a read/write cycle the same way.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub permissions: PermissionSettings,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub hooks: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Settings {
    /// Load settings for a project. A missing or unreadable file yields the
    /// defaults; the permission engine treats that as "no rules".
    pub fn load(paths: &StoragePaths, working_directory: &Path) -> Self {
        let path = paths.settings_path(working_directory);
        match read_json(&path) {
            Ok(Some(settings)) => settings,
            Ok(None) => Self::default(),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "failed to read settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, paths: &StoragePaths, working_directory: &Path) -> Result<()> {
        let path = paths.settings_path(working_directory);
        write_json_atomic(&path, self)
    }
}

/// Read a JSON file, distinguishing "absent" from "broken".
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Serialize to a sibling temp file, then rename into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .context("target path has no parent directory")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let data = serde_json::to_string_pretty(value).context("failed to serialize")?;
    let temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    std::fs::write(temp.path(), data.as_bytes())
        .with_context(|| format!("failed to write {}", temp.path().display()))?;
    temp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}
