//! Permission engine: allow/deny/ask decisions for every tool invocation.
//!
//! Evaluation is a pure function of the invocation plus an on-demand
//! settings snapshot; it never returns an error. I/O failures while loading
//! settings or ignore rules collapse to "no rules".

pub mod command;
pub mod pattern;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::debug;

use crate::config::{Settings, StoragePaths};

/// The one decision the engine produces. No partial answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow { reason: String },
    Deny { reason: String },
    AskUser { pattern: String },
}

/// What to do with an `AskUser` outcome when no interactive host exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AskBehavior {
    /// Route to the interactive host.
    #[default]
    Ask,
    /// Headless hosts: fail closed.
    Deny,
    /// Tests only: fail open.
    Allow,
}

/// Tools allowed unconditionally because they cannot mutate anything.
static READ_ONLY_TOOLS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["Read", "Grep", "Glob"].into_iter().collect());

/// Tools whose targets are checked against the project ignore rules.
static READ_STYLE_TOOLS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["Read", "Grep", "Glob", "NotebookRead"].into_iter().collect());

/// Write-style tools eligible for the session pattern cache.
static WRITE_TOOLS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["Write", "Edit", "MultiEdit", "NotebookEdit"].into_iter().collect());

/// Well-known harness tools that are always safe to run.
static INTERNAL_TOOLS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["TodoWrite", "BashOutput", "KillShell", "Task", "ExitPlanMode"]
        .into_iter()
        .collect()
});

/// Tools denied outright. Currently one context-flooding analysis tool.
static BLOCKED_TOOLS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["mcp__diagnostics__project_scan"].into_iter().collect());

/// Traversal fragments rejected in any path-like field.
const TRAVERSAL_FRAGMENTS: &[&str] = &["../", "..\\", "%2e%2e", "%252e%252e"];

/// Name of the optional per-project ignore file, one glob per line.
const IGNORE_FILE: &str = ".agentignore";

pub struct PermissionEngine {
    paths: StoragePaths,
    working_directory: PathBuf,
    ask_behavior: AskBehavior,
    /// Prefixes of tool names exposed by our own in-process servers.
    internal_prefixes: Vec<String>,
    /// Patterns approved during this run for write/edit tools.
    session_cache: RwLock<HashSet<String>>,
    /// Ignore globs, loaded lazily; `None` means not yet attempted.
    ignore_rules: RwLock<Option<Vec<String>>>,
}

impl PermissionEngine {
    pub fn new(
        paths: StoragePaths,
        working_directory: impl Into<PathBuf>,
        ask_behavior: AskBehavior,
    ) -> Self {
        Self {
            paths,
            working_directory: working_directory.into(),
            ask_behavior,
            internal_prefixes: Vec::new(),
            session_cache: RwLock::new(HashSet::new()),
            ignore_rules: RwLock::new(None),
        }
    }

    /// Register the tool servers this host ships; their tools are always
    /// allowed.
    pub fn with_internal_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.internal_prefixes = servers
            .into_iter()
            .map(|name| format!("mcp__{}__", name.as_ref()))
            .collect();
        self
    }

    pub fn ask_behavior(&self) -> AskBehavior {
        self.ask_behavior
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Approve a pattern for the rest of this run (write/edit tools only).
    pub fn add_session_pattern(&self, pattern: impl Into<String>) {
        self.session_cache
            .write()
            .expect("session cache lock")
            .insert(pattern.into());
    }

    pub fn clear_session_cache(&self) {
        self.session_cache
            .write()
            .expect("session cache lock")
            .clear();
    }

    /// Evaluate one invocation. First match wins; never errors.
    pub fn evaluate(&self, tool_name: &str, input: &Value) -> Decision {
        // 1. Path traversal is rejected before anything else can allow it.
        if let Some(offender) = find_traversal(input) {
            return Decision::Deny {
                reason: format!("path traversal rejected: {}", offender),
            };
        }

        // 2. Project ignore rules for read-style tools.
        if READ_STYLE_TOOLS.contains(tool_name) {
            if let Some(path) = pattern::file_path_from_input(input) {
                if self.is_ignored(&path) {
                    return Decision::Deny {
                        reason: format!("{} is excluded by the project ignore list", path),
                    };
                }
            }
        }

        // 3. Hard block list.
        if BLOCKED_TOOLS.contains(tool_name) {
            return Decision::Deny {
                reason: format!("{} is blocked", tool_name),
            };
        }

        // 4. Our own tool servers and well-known harness tools.
        if INTERNAL_TOOLS.contains(tool_name)
            || self
                .internal_prefixes
                .iter()
                .any(|prefix| tool_name.starts_with(prefix))
        {
            return Decision::Allow {
                reason: "internal tool".to_string(),
            };
        }

        // 5. Read-only tools need no approval.
        if READ_ONLY_TOOLS.contains(tool_name) {
            return Decision::Allow {
                reason: "read-only tool".to_string(),
            };
        }

        let settings = Settings::load(&self.paths, &self.working_directory);

        // 6. Deny patterns have strictly higher precedence than allow.
        for deny in &settings.permissions.deny {
            if pattern::matches(deny, tool_name, input, &self.working_directory) {
                return Decision::Deny {
                    reason: format!("denied by pattern {}", deny),
                };
            }
        }

        // 7. Fully read-only shell commands.
        if pattern::is_shell_tool(tool_name) {
            let command = input.get("command").and_then(Value::as_str).unwrap_or("");
            if command::is_safe_command(command, &self.working_directory) {
                return Decision::Allow {
                    reason: "read-only command".to_string(),
                };
            }
        }

        // 8. Session-approved patterns for write/edit tools.
        if WRITE_TOOLS.contains(tool_name) {
            let cache = self.session_cache.read().expect("session cache lock");
            for cached in cache.iter() {
                if pattern::matches(cached, tool_name, input, &self.working_directory) {
                    return Decision::Allow {
                        reason: format!("approved this session ({})", cached),
                    };
                }
            }
        }

        // 9. Allow patterns from settings.
        for allow in &settings.permissions.allow {
            if pattern::matches(allow, tool_name, input, &self.working_directory) {
                return Decision::Allow {
                    reason: format!("allowed by pattern {}", allow),
                };
            }
        }

        // 10. Hand the decision to the user with a reusable suggestion.
        Decision::AskUser {
            pattern: pattern::infer_pattern(tool_name, input),
        }
    }

    fn is_ignored(&self, path: &str) -> bool {
        {
            let loaded = self.ignore_rules.read().expect("ignore lock");
            if let Some(rules) = loaded.as_ref() {
                return rules.iter().any(|rule| pattern::glob_match(rule, path));
            }
        }
        let rules = self.load_ignore_rules();
        let matched = rules.iter().any(|rule| pattern::glob_match(rule, path));
        *self.ignore_rules.write().expect("ignore lock") = Some(rules);
        matched
    }

    /// Best-effort load; unreadable files mean "no ignore rules".
    fn load_ignore_rules(&self) -> Vec<String> {
        let path = self.working_directory.join(IGNORE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(ToString::to_string)
                .collect(),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "no ignore rules loaded");
                Vec::new()
            }
        }
    }
}

/// Scan path-like input fields for traversal fragments.
fn find_traversal(input: &Value) -> Option<String> {
    fn scan(value: &Value, key_hint: bool) -> Option<String> {
        match value {
            Value::String(text) => {
                if key_hint && contains_traversal(text) {
                    return Some(text.clone());
                }
                None
            }
            Value::Array(items) => items.iter().find_map(|item| scan(item, key_hint)),
            Value::Object(map) => map.iter().find_map(|(key, value)| {
                let lowered = key.to_ascii_lowercase();
                let hinted = lowered.contains("path")
                    || lowered.contains("file")
                    || lowered.contains("dir")
                    || lowered == "cwd"
                    || lowered == "target"
                    || lowered == "destination";
                scan(value, hinted)
            }),
            _ => None,
        }
    }
    scan(input, false)
}

fn contains_traversal(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    TRAVERSAL_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
        || lowered == ".."
        || lowered.ends_with("/..")
        || lowered.ends_with("\\..")
}
