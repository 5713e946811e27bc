//! VCS tool server: exposes the git adapter tool-by-tool.

use agent_wire::ToolOutput;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ToolDeclaration, ToolServer};
use crate::error::Result;
use crate::git::GitClient;

pub struct VcsToolServer {
    client: GitClient,
}

impl VcsToolServer {
    pub fn new(client: GitClient) -> Self {
        Self { client }
    }

    async fn run_tool(&self, tool: &str, args: &Value) -> Result<String> {
        let str_arg = |key: &str| args.get(key).and_then(Value::as_str);
        let bool_arg = |key: &str| args.get(key).and_then(Value::as_bool).unwrap_or(false);
        let files_arg = |key: &str| -> Vec<String> {
            args.get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        match tool {
            "gitStatus" => {
                if bool_arg("detailed") {
                    self.client.status().await
                } else {
                    let porcelain = self.client.status_porcelain().await?;
                    if porcelain.is_empty() {
                        Ok("Working tree clean".to_string())
                    } else {
                        Ok(porcelain)
                    }
                }
            }
            "gitAdd" => {
                let files = files_arg("files");
                let refs: Vec<&str> = files.iter().map(String::as_str).collect();
                self.client.add(&refs).await?;
                Ok("Staged".to_string())
            }
            "gitCommit" => {
                let message = str_arg("message").unwrap_or("update");
                self.client
                    .commit(message, bool_arg("amend"), bool_arg("all"))
                    .await
            }
            "gitDiff" => {
                let files = files_arg("files");
                let refs: Vec<&str> = files.iter().map(String::as_str).collect();
                let diff = self.client.diff(bool_arg("staged"), &refs).await?;
                if diff.is_empty() {
                    Ok("No changes".to_string())
                } else {
                    Ok(diff)
                }
            }
            "gitLog" => {
                let count = args.get("count").and_then(Value::as_u64).unwrap_or(10) as usize;
                if bool_arg("oneline") {
                    self.client.log_oneline(count).await
                } else {
                    let entries = self.client.log(count).await?;
                    Ok(serde_json::to_string_pretty(&entries).unwrap_or_default())
                }
            }
            "gitBranch" => {
                if let Some(create) = str_arg("create") {
                    self.client.branch_create(create).await?;
                    Ok(format!("Created branch {}", create))
                } else if let Some(delete) = str_arg("delete") {
                    self.client.branch_delete(delete, bool_arg("force")).await?;
                    Ok(format!("Deleted branch {}", delete))
                } else {
                    let branches = self.client.branch_list(bool_arg("all")).await?;
                    Ok(branches.join("\n"))
                }
            }
            "gitCheckout" => {
                let files = files_arg("files");
                if !files.is_empty() {
                    let refs: Vec<&str> = files.iter().map(String::as_str).collect();
                    self.client.checkout_files(&refs).await?;
                    Ok("Restored files".to_string())
                } else {
                    let branch = str_arg("branch").ok_or_else(|| {
                        crate::error::StarlingError::git("gitCheckout requires branch or files")
                    })?;
                    self.client.checkout(branch, bool_arg("create")).await?;
                    Ok(format!("Checked out {}", branch))
                }
            }
            "gitStash" => match str_arg("action").unwrap_or("save") {
                "save" => self.client.stash_save(str_arg("message")).await,
                "pop" => self.client.stash_pop().await,
                "apply" => {
                    let index = args.get("index").and_then(Value::as_u64).map(|i| i as usize);
                    self.client.stash_apply(index).await
                }
                "drop" => {
                    let index = args.get("index").and_then(Value::as_u64).map(|i| i as usize);
                    self.client.stash_drop(index).await
                }
                "clear" => {
                    self.client.stash_clear().await?;
                    Ok("Stash cleared".to_string())
                }
                "list" => {
                    let stashes = self.client.stash_list().await?;
                    if stashes.is_empty() {
                        Ok("No stashes".to_string())
                    } else {
                        Ok(stashes.join("\n"))
                    }
                }
                other => Err(crate::error::StarlingError::git(format!(
                    "unknown stash action: {}",
                    other
                ))),
            },
            "gitWorktree" => match str_arg("action").unwrap_or("list") {
                "list" => {
                    let worktrees = self.client.worktree_list().await?;
                    Ok(serde_json::to_string_pretty(&worktrees).unwrap_or_default())
                }
                "add" => {
                    let path = str_arg("path").ok_or_else(|| {
                        crate::error::StarlingError::git("worktree add requires path")
                    })?;
                    let branch = str_arg("branch").ok_or_else(|| {
                        crate::error::StarlingError::git("worktree add requires branch")
                    })?;
                    let info = self
                        .client
                        .worktree_add(
                            std::path::Path::new(path),
                            branch,
                            bool_arg("createBranch"),
                        )
                        .await?;
                    Ok(format!("Added worktree at {}", info.path.display()))
                }
                "remove" => {
                    let path = str_arg("path").ok_or_else(|| {
                        crate::error::StarlingError::git("worktree remove requires path")
                    })?;
                    self.client
                        .worktree_remove(std::path::Path::new(path), bool_arg("force"))
                        .await?;
                    Ok("Removed worktree".to_string())
                }
                "lock" => {
                    let path = str_arg("path").ok_or_else(|| {
                        crate::error::StarlingError::git("worktree lock requires path")
                    })?;
                    self.client
                        .worktree_lock(std::path::Path::new(path), str_arg("reason"))
                        .await?;
                    Ok("Locked worktree".to_string())
                }
                "unlock" => {
                    let path = str_arg("path").ok_or_else(|| {
                        crate::error::StarlingError::git("worktree unlock requires path")
                    })?;
                    self.client
                        .worktree_unlock(std::path::Path::new(path))
                        .await?;
                    Ok("Unlocked worktree".to_string())
                }
                other => Err(crate::error::StarlingError::git(format!(
                    "unknown worktree action: {}",
                    other
                ))),
            },
            "gitFetch" => {
                self.client.fetch().await?;
                Ok("Fetched".to_string())
            }
            "gitPull" => self.client.pull(bool_arg("rebase")).await,
            "gitMerge" => {
                if bool_arg("abort") {
                    self.client.merge_abort().await?;
                    Ok("Merge aborted".to_string())
                } else {
                    let branch = str_arg("branch").ok_or_else(|| {
                        crate::error::StarlingError::git("gitMerge requires branch")
                    })?;
                    self.client.merge(branch).await
                }
            }
            "gitRebase" => match str_arg("action").unwrap_or("start") {
                "start" => {
                    let target = str_arg("target").ok_or_else(|| {
                        crate::error::StarlingError::git("gitRebase requires target")
                    })?;
                    self.client.rebase(target).await
                }
                "continue" => self.client.rebase_continue().await,
                "abort" => {
                    self.client.rebase_abort().await?;
                    Ok("Rebase aborted".to_string())
                }
                "skip" => self.client.rebase_skip().await,
                other => Err(crate::error::StarlingError::git(format!(
                    "unknown rebase action: {}",
                    other
                ))),
            },
            other => Err(crate::error::StarlingError::git(format!(
                "unknown tool: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl ToolServer for VcsToolServer {
    fn name(&self) -> &str {
        "vcs"
    }

    fn tools(&self) -> Vec<ToolDeclaration> {
        let empty = json!({"type": "object", "properties": {}});
        vec![
            ToolDeclaration::new(
                "gitStatus",
                "Show working tree status (set detailed for the long form)",
                json!({"type": "object", "properties": {"detailed": {"type": "boolean"}}}),
            ),
            ToolDeclaration::new(
                "gitAdd",
                "Stage files (everything when files is omitted)",
                json!({"type": "object", "properties": {"files": {"type": "array", "items": {"type": "string"}}}}),
            ),
            ToolDeclaration::new(
                "gitCommit",
                "Create a commit",
                json!({
                    "type": "object",
                    "properties": {
                        "message": {"type": "string"},
                        "amend": {"type": "boolean"},
                        "all": {"type": "boolean"},
                    },
                    "required": ["message"],
                }),
            ),
            ToolDeclaration::new(
                "gitDiff",
                "Show unstaged or staged changes",
                json!({
                    "type": "object",
                    "properties": {
                        "staged": {"type": "boolean"},
                        "files": {"type": "array", "items": {"type": "string"}},
                    },
                }),
            ),
            ToolDeclaration::new(
                "gitLog",
                "Show recent commits",
                json!({
                    "type": "object",
                    "properties": {
                        "count": {"type": "integer"},
                        "oneline": {"type": "boolean"},
                    },
                }),
            ),
            ToolDeclaration::new(
                "gitBranch",
                "List, create or delete branches",
                json!({
                    "type": "object",
                    "properties": {
                        "all": {"type": "boolean"},
                        "create": {"type": "string"},
                        "delete": {"type": "string"},
                        "force": {"type": "boolean"},
                    },
                }),
            ),
            ToolDeclaration::new(
                "gitCheckout",
                "Switch branches or restore files",
                json!({
                    "type": "object",
                    "properties": {
                        "branch": {"type": "string"},
                        "create": {"type": "boolean"},
                        "files": {"type": "array", "items": {"type": "string"}},
                    },
                }),
            ),
            ToolDeclaration::new(
                "gitStash",
                "Stash operations: save, pop, list, apply, drop, clear",
                json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["save", "pop", "list", "apply", "drop", "clear"]},
                        "message": {"type": "string"},
                        "index": {"type": "integer"},
                    },
                }),
            ),
            ToolDeclaration::new(
                "gitWorktree",
                "Worktree operations: list, add, remove, lock, unlock",
                json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["list", "add", "remove", "lock", "unlock"]},
                        "path": {"type": "string"},
                        "branch": {"type": "string"},
                        "createBranch": {"type": "boolean"},
                        "force": {"type": "boolean"},
                        "reason": {"type": "string"},
                    },
                }),
            ),
            ToolDeclaration::new("gitFetch", "Fetch from the default remote", empty),
            ToolDeclaration::new(
                "gitPull",
                "Pull from the default remote",
                json!({"type": "object", "properties": {"rebase": {"type": "boolean"}}}),
            ),
            ToolDeclaration::new(
                "gitMerge",
                "Merge a branch, or abort an in-progress merge",
                json!({
                    "type": "object",
                    "properties": {
                        "branch": {"type": "string"},
                        "abort": {"type": "boolean"},
                    },
                }),
            ),
            ToolDeclaration::new(
                "gitRebase",
                "Rebase onto a target, or continue/abort/skip",
                json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["start", "continue", "abort", "skip"]},
                        "target": {"type": "string"},
                    },
                }),
            ),
        ]
    }

    async fn call(&self, tool: &str, args: Value) -> ToolOutput {
        match self.run_tool(tool, &args).await {
            Ok(text) => ToolOutput::text(text),
            Err(err) => ToolOutput::error(err.to_string()),
        }
    }
}
