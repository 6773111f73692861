// src/vcs/git.rs

//! The git operation set the runner consumes.
//!
//! Everything goes through [`GitRepo::run`], which spawns `git` with the
//! repository (or a worktree) as its working directory and returns
//! trimmed stdout. Operations not listed here are not used anywhere.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::errors::{AgentDagError, Result};

/// Handle on the repository the run operates in. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// Outcome of a merge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeResult {
    Clean,
    /// Conflicted paths, from `git diff --diff-filter=U`.
    Conflict(Vec<String>),
}

impl GitRepo {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a git command in the repository root.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        self.run_in(&self.root, args).await
    }

    /// Run a git command in an arbitrary directory (a worktree).
    pub async fn run_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        debug!(dir = %dir.display(), ?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await?;

        if !output.status.success() {
            return Err(AgentDagError::Git {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let stdout = self.run(&["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&stdout))
    }

    /// Materialize a new worktree on a new branch cut from `base`.
    pub async fn add_worktree(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run(&["worktree", "add", "-b", branch, &path_str, base])
            .await?;
        Ok(())
    }

    pub async fn remove_worktree(&self, path: &Path, force: bool) -> Result<()> {
        let path_str = path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        self.run(&args).await?;
        Ok(())
    }

    pub async fn prune_worktrees(&self) -> Result<()> {
        self.run(&["worktree", "prune"]).await?;
        Ok(())
    }

    pub async fn branch_exists(&self, name: &str) -> bool {
        self.run(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{name}")])
            .await
            .is_ok()
    }

    pub async fn delete_branch(&self, name: &str) -> Result<()> {
        self.run(&["branch", "-D", name]).await?;
        Ok(())
    }

    pub async fn checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        self.run_in(dir, &["checkout", branch]).await?;
        Ok(())
    }

    /// Local branches matching a glob, short names.
    pub async fn branches_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let stdout = self
            .run(&[
                "branch",
                "--list",
                pattern,
                "--format",
                "%(refname:short)",
            ])
            .await?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub async fn is_dirty(&self, dir: &Path) -> Result<bool> {
        let status = self.run_in(dir, &["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    /// Untracked and modified paths, from porcelain status.
    pub async fn dirty_paths(&self, dir: &Path) -> Result<Vec<String>> {
        let status = self.run_in(dir, &["status", "--porcelain"]).await?;
        Ok(status
            .lines()
            .filter_map(|l| l.get(3..).map(|p| p.trim().to_string()))
            .collect())
    }

    /// Untracked paths only (porcelain status `??` entries).
    pub async fn untracked_paths(&self, dir: &Path) -> Result<Vec<String>> {
        let status = self.run_in(dir, &["status", "--porcelain"]).await?;
        Ok(parse_untracked(&status))
    }

    /// Stage everything and commit.
    pub async fn commit_all(&self, dir: &Path, message: &str) -> Result<()> {
        self.run_in(dir, &["add", "-A"]).await?;
        self.run_in(dir, &["commit", "-m", message]).await?;
        Ok(())
    }

    /// Commits on `head` that are not on `base`.
    pub async fn count_commits(&self, base: &str, head: &str) -> Result<u64> {
        let stdout = self
            .run(&["rev-list", "--count", &format!("{base}..{head}")])
            .await?;
        stdout
            .parse::<u64>()
            .map_err(|e| AgentDagError::Other(anyhow::anyhow!("parsing commit count: {e}")))
    }

    /// Files changed on `head` since it diverged from `base`.
    pub async fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let stdout = self
            .run(&["diff", "--name-only", &format!("{base}...{head}")])
            .await?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Attempt a merge that always records a merge commit.
    pub async fn merge_no_ff(
        &self,
        dir: &Path,
        branch: &str,
        message: &str,
    ) -> Result<MergeResult> {
        match self
            .run_in(dir, &["merge", "--no-ff", branch, "-m", message])
            .await
        {
            Ok(_) => Ok(MergeResult::Clean),
            Err(merge_err) => {
                let conflicted = self.conflicted_files(dir).await?;
                if conflicted.is_empty() {
                    Err(merge_err)
                } else {
                    Ok(MergeResult::Conflict(conflicted))
                }
            }
        }
    }

    pub async fn conflicted_files(&self, dir: &Path) -> Result<Vec<String>> {
        let stdout = self
            .run_in(dir, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub async fn abort_merge(&self, dir: &Path) -> Result<()> {
        self.run_in(dir, &["merge", "--abort"]).await?;
        Ok(())
    }

    /// Conclude a conflicted merge after resolution, keeping MERGE_HEAD
    /// parents.
    pub async fn conclude_merge(&self, dir: &Path, message: &str) -> Result<()> {
        self.run_in(dir, &["add", "-A"]).await?;
        self.run_in(dir, &["commit", "-m", message]).await?;
        Ok(())
    }
}

fn parse_untracked(status_output: &str) -> Vec<String> {
    status_output
        .lines()
        .filter_map(|line| line.strip_prefix("?? "))
        .map(|p| p.trim().to_string())
        .collect()
}

fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        let mut parts = line.splitn(2, ' ');
        let key = parts.next().unwrap_or("");
        let value = parts.next();

        match key {
            "worktree" => {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
                current = Some(WorktreeEntry {
                    path: PathBuf::from(value.unwrap_or("")),
                    branch: None,
                });
            }
            "branch" => {
                if let Some(ref mut entry) = current {
                    entry.branch = value
                        .map(|v| v.strip_prefix("refs/heads/").unwrap_or(v).to_string());
                }
            }
            // HEAD, bare, detached, locked, prunable: not consumed here.
            _ => {}
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_porcelain_worktree_list() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/.agentdag/demo/worktrees/agent-1\nHEAD def456\nbranch refs/heads/agentdag/agent-1-add-login\n\nworktree /repo/detached\nHEAD 0123\ndetached\n";
        let entries = parse_worktree_list(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(
            entries[1].branch.as_deref(),
            Some("agentdag/agent-1-add-login")
        );
        assert_eq!(entries[2].branch, None);
    }

    #[test]
    fn parses_untracked_entries_from_porcelain_status() {
        let status = "?? tasks.toml\n M src/lib.rs\n?? progress.txt\nA  new.rs";
        assert_eq!(parse_untracked(status), vec!["tasks.toml", "progress.txt"]);
    }

    #[test]
    fn parses_list_without_trailing_blank_line() {
        let output = "worktree /repo\nbranch refs/heads/main";
        let entries = parse_worktree_list(output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("/repo"));
    }
}
