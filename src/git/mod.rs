//! Thin adapter over the git CLI.
//!
//! Every operation shells out to `git` in the repository directory and
//! preserves the raw stderr in typed failures. Operations with "expected
//! empty" results (no changes, no stashes) return empty values instead of
//! errors.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, StarlingError};

/// One worktree from `git worktree list --porcelain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub head_commit: String,
    pub is_locked: bool,
    pub is_bare: bool,
}

/// One structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Shell-command based git client rooted at one repository.
#[derive(Debug, Clone)]
pub struct GitClient {
    repo_path: PathBuf,
}

impl GitClient {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Check if git is available on the system.
    pub fn is_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(args = ?args, cwd = %self.repo_path.display(), "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .await
            .map_err(|err| {
                StarlingError::git(format!("failed to execute git {}", args.join(" ")))
                    .with_source(err)
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(StarlingError::git(format!(
                "git {} failed (exit code: {:?}): {}",
                args.join(" "),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    // ── Status / staging ────────────────────────────────────────────────

    /// Human-readable status.
    pub async fn status(&self) -> Result<String> {
        self.run(&["status"]).await
    }

    /// Porcelain status, one line per changed path; empty when clean.
    pub async fn status_porcelain(&self) -> Result<String> {
        self.run(&["status", "--porcelain"]).await
    }

    pub async fn add(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add"];
        if paths.is_empty() {
            args.push(".");
        } else {
            args.extend(paths);
        }
        self.run(&args).await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str, amend: bool, all: bool) -> Result<String> {
        let mut args = vec!["commit", "-m", message];
        if amend {
            args.push("--amend");
        }
        if all {
            args.push("-a");
        }
        self.run(&args).await
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Diff of unstaged (or staged) changes, optionally limited to files.
    pub async fn diff(&self, staged: bool, files: &[&str]) -> Result<String> {
        let mut args = vec!["diff"];
        if staged {
            args.push("--cached");
        }
        if !files.is_empty() {
            args.push("--");
            args.extend(files);
        }
        self.run(&args).await
    }

    pub async fn log_oneline(&self, count: usize) -> Result<String> {
        let limit = format!("-{}", count);
        self.run(&["log", "--oneline", &limit]).await
    }

    /// Structured log with a stable field separator.
    pub async fn log(&self, count: usize) -> Result<Vec<LogEntry>> {
        let limit = format!("-{}", count);
        let output = self
            .run(&["log", &limit, "--pretty=format:%H%x1f%an%x1f%aI%x1f%s"])
            .await?;
        Ok(output
            .lines()
            .filter_map(|line| {
                let mut fields = line.split('\u{1f}');
                Some(LogEntry {
                    hash: fields.next()?.to_string(),
                    author: fields.next()?.to_string(),
                    date: fields.next()?.to_string(),
                    message: fields.next()?.to_string(),
                })
            })
            .collect())
    }

    // ── Branches ────────────────────────────────────────────────────────

    pub async fn branch_list(&self, all: bool) -> Result<Vec<String>> {
        let args: &[&str] = if all {
            &["branch", "--all", "--format=%(refname:short)"]
        } else {
            &["branch", "--format=%(refname:short)"]
        };
        let output = self.run(args).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    pub async fn branch_create(&self, name: &str) -> Result<()> {
        self.run(&["branch", name]).await?;
        Ok(())
    }

    pub async fn branch_delete(&self, name: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, name]).await?;
        Ok(())
    }

    pub async fn current_branch(&self) -> Result<String> {
        let output = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(output.trim().to_string())
    }

    pub async fn checkout(&self, branch: &str, create: bool) -> Result<()> {
        let mut args = vec!["checkout"];
        if create {
            args.push("-b");
        }
        args.push(branch);
        self.run(&args).await?;
        info!(branch = %branch, create, "checked out branch");
        Ok(())
    }

    /// Restore specific files from HEAD.
    pub async fn checkout_files(&self, files: &[&str]) -> Result<()> {
        let mut args = vec!["checkout", "--"];
        args.extend(files);
        self.run(&args).await?;
        Ok(())
    }

    // ── Stash ───────────────────────────────────────────────────────────

    pub async fn stash_save(&self, message: Option<&str>) -> Result<String> {
        match message {
            Some(message) => self.run(&["stash", "push", "-m", message]).await,
            None => self.run(&["stash", "push"]).await,
        }
    }

    pub async fn stash_pop(&self) -> Result<String> {
        self.run(&["stash", "pop"]).await
    }

    pub async fn stash_apply(&self, index: Option<usize>) -> Result<String> {
        match index {
            Some(index) => {
                let reference = format!("stash@{{{}}}", index);
                self.run(&["stash", "apply", &reference]).await
            }
            None => self.run(&["stash", "apply"]).await,
        }
    }

    pub async fn stash_drop(&self, index: Option<usize>) -> Result<String> {
        match index {
            Some(index) => {
                let reference = format!("stash@{{{}}}", index);
                self.run(&["stash", "drop", &reference]).await
            }
            None => self.run(&["stash", "drop"]).await,
        }
    }

    pub async fn stash_clear(&self) -> Result<()> {
        self.run(&["stash", "clear"]).await?;
        Ok(())
    }

    /// Stash list; empty when there are no stashes.
    pub async fn stash_list(&self) -> Result<Vec<String>> {
        let output = self.run(&["stash", "list"]).await?;
        Ok(output.lines().map(ToString::to_string).collect())
    }

    // ── Worktrees ───────────────────────────────────────────────────────

    pub async fn worktree_list(&self) -> Result<Vec<WorktreeInfo>> {
        let output = self.run(&["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&output))
    }

    pub async fn worktree_add(
        &self,
        path: &Path,
        branch: &str,
        create_branch: bool,
    ) -> Result<WorktreeInfo> {
        let path_str = path
            .to_str()
            .ok_or_else(|| StarlingError::git(format!("invalid UTF-8 in path: {:?}", path)))?;

        let mut args = vec!["worktree", "add"];
        if create_branch {
            args.extend(["-b", branch, path_str]);
        } else {
            args.extend([path_str, branch]);
        }
        self.run(&args).await?;

        info!(path = %path.display(), branch = %branch, "created worktree");
        Ok(WorktreeInfo {
            path: path.to_path_buf(),
            branch: branch.to_string(),
            head_commit: String::new(),
            is_locked: false,
            is_bare: false,
        })
    }

    pub async fn worktree_remove(&self, path: &Path, force: bool) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| StarlingError::git(format!("invalid UTF-8 in path: {:?}", path)))?;
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str);
        self.run(&args).await?;
        Ok(())
    }

    pub async fn worktree_lock(&self, path: &Path, reason: Option<&str>) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| StarlingError::git(format!("invalid UTF-8 in path: {:?}", path)))?;
        let mut args = vec!["worktree", "lock"];
        if let Some(reason) = reason {
            args.extend(["--reason", reason]);
        }
        args.push(path_str);
        self.run(&args).await?;
        Ok(())
    }

    pub async fn worktree_unlock(&self, path: &Path) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| StarlingError::git(format!("invalid UTF-8 in path: {:?}", path)))?;
        self.run(&["worktree", "unlock", path_str]).await?;
        Ok(())
    }

    // ── Remotes / integration ───────────────────────────────────────────

    pub async fn fetch(&self) -> Result<()> {
        self.run(&["fetch"]).await?;
        Ok(())
    }

    pub async fn pull(&self, rebase: bool) -> Result<String> {
        if rebase {
            self.run(&["pull", "--rebase"]).await
        } else {
            self.run(&["pull"]).await
        }
    }

    pub async fn merge(&self, branch: &str) -> Result<String> {
        self.run(&["merge", branch]).await
    }

    pub async fn merge_abort(&self) -> Result<()> {
        self.run(&["merge", "--abort"]).await?;
        Ok(())
    }

    pub async fn rebase(&self, target: &str) -> Result<String> {
        self.run(&["rebase", target]).await
    }

    pub async fn rebase_continue(&self) -> Result<String> {
        self.run(&["rebase", "--continue"]).await
    }

    pub async fn rebase_abort(&self) -> Result<()> {
        self.run(&["rebase", "--abort"]).await?;
        Ok(())
    }

    pub async fn rebase_skip(&self) -> Result<String> {
        self.run(&["rebase", "--skip"]).await
    }
}

fn parse_worktree_list(output: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(worktree) = current.take() {
                worktrees.push(worktree);
            }
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                branch: String::new(),
                head_commit: String::new(),
                is_locked: false,
                is_bare: false,
            });
        } else if let Some(ref mut worktree) = current {
            if let Some(head) = line.strip_prefix("HEAD ") {
                worktree.head_commit = head.to_string();
            } else if let Some(branch) = line.strip_prefix("branch ") {
                worktree.branch = branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_string();
            } else if line == "bare" {
                worktree.is_bare = true;
            } else if line == "locked" || line.starts_with("locked ") {
                worktree.is_locked = true;
            }
        }
    }
    if let Some(worktree) = current {
        worktrees.push(worktree);
    }
    worktrees
}
