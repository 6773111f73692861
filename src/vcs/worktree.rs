// src/vcs/worktree.rs

//! Per-task agent worktrees.
//!
//! Each supervised task gets a freshly materialized checkout of the run's
//! base branch in a newly created branch named
//! `<prefix>/agent-<slot>-<slug(title)>`. Creation is crash-tolerant:
//! any prior worktree or branch with the same name is force-removed
//! first, so resumed runs do not trip over a crashed predecessor.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::vcs::git::GitRepo;

const SLUG_MAX_LEN: usize = 50;

/// An isolated checkout bound to a task branch.
#[derive(Debug, Clone)]
pub struct AgentWorktree {
    pub path: PathBuf,
    pub branch: String,
    pub slot: u64,
}

/// What teardown did with a worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Removed,
    /// Uncommitted work present; the worktree was kept for inspection.
    PreservedDirty,
}

#[derive(Debug, Clone)]
pub struct WorktreeManager {
    git: GitRepo,
    root: PathBuf,
    branch_prefix: String,
    base_branch: String,
}

impl WorktreeManager {
    pub fn new(
        git: GitRepo,
        root: PathBuf,
        branch_prefix: String,
        base_branch: String,
    ) -> Self {
        Self {
            git,
            root,
            branch_prefix,
            base_branch,
        }
    }

    pub fn branch_for(&self, slot: u64, title: &str) -> String {
        format!("{}/agent-{}-{}", self.branch_prefix, slot, slug(title))
    }

    /// Materialize a fresh worktree for one task attempt.
    pub async fn create(&self, slot: u64, title: &str) -> Result<AgentWorktree> {
        let branch = self.branch_for(slot, title);
        let path = self.root.join(format!("agent-{slot}"));

        self.remove_stale(&path, &branch).await?;

        std::fs::create_dir_all(&self.root)?;
        self.git
            .add_worktree(&path, &branch, &self.base_branch)
            .await?;

        info!(branch = %branch, path = %path.display(), "created agent worktree");
        Ok(AgentWorktree { path, branch, slot })
    }

    /// Force-remove any worktree or branch left behind by a previous
    /// attempt or a crashed run.
    async fn remove_stale(&self, path: &PathBuf, branch: &str) -> Result<()> {
        for entry in self.git.list_worktrees().await? {
            let holds_branch = entry.branch.as_deref() == Some(branch);
            if holds_branch || &entry.path == path {
                warn!(path = %entry.path.display(), "removing stale worktree");
                let _ = self.git.remove_worktree(&entry.path, true).await;
            }
        }
        if path.exists() {
            let _ = std::fs::remove_dir_all(path);
            self.git.prune_worktrees().await?;
        }
        if self.git.branch_exists(branch).await {
            warn!(branch = %branch, "force-deleting stale branch");
            self.git.delete_branch(branch).await?;
        }
        Ok(())
    }

    /// Remove a worktree after supervision.
    ///
    /// A dirty tree is never destroyed — uncommitted work is preserved
    /// for forensic inspection. `delete_branch` is set for failed tasks
    /// whose branch has no further use; successful tasks keep the branch
    /// for the integrator, which deletes it after the merge.
    pub async fn teardown(
        &self,
        worktree: &AgentWorktree,
        delete_branch: bool,
    ) -> Result<Teardown> {
        if self.git.is_dirty(&worktree.path).await? {
            warn!(
                path = %worktree.path.display(),
                branch = %worktree.branch,
                "worktree has uncommitted changes; preserving for inspection"
            );
            return Ok(Teardown::PreservedDirty);
        }

        self.git.remove_worktree(&worktree.path, true).await?;
        if delete_branch && self.git.branch_exists(&worktree.branch).await {
            self.git.delete_branch(&worktree.branch).await?;
        }
        debug!(branch = %worktree.branch, "worktree torn down");
        Ok(Teardown::Removed)
    }

    /// Startup garbage collector: prune worktree metadata, then delete
    /// any `<prefix>/agent-*` branch whose worktree no longer exists.
    pub async fn gc(&self) -> Result<()> {
        self.git.prune_worktrees().await?;

        let pattern = format!("{}/agent-*", self.branch_prefix);
        let stale = self.git.branches_matching(&pattern).await?;
        if stale.is_empty() {
            return Ok(());
        }

        let worktrees = self.git.list_worktrees().await?;
        for branch in stale {
            let referenced = worktrees
                .iter()
                .any(|w| w.branch.as_deref() == Some(branch.as_str()) && w.path.exists());
            if !referenced {
                info!(branch = %branch, "garbage-collecting orphaned agent branch");
                let _ = self.git.delete_branch(&branch).await;
            }
        }
        Ok(())
    }
}

/// Branch-name slug: lowercase, non-alphanumerics collapsed to single
/// hyphens, trimmed, truncated to 50 characters. Idempotent.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_hyphen = true;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            out.push('-');
            last_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(SLUG_MAX_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn slug_lowercases_and_collapses() {
        assert_eq!(slug("Add OAuth2 login!!"), "add-oauth2-login");
        assert_eq!(slug("  spaces   everywhere  "), "spaces-everywhere");
        assert_eq!(slug("already-slugged"), "already-slugged");
    }

    #[test]
    fn slug_truncates_to_fifty() {
        let long = "x".repeat(80);
        assert_eq!(slug(&long).len(), 50);
    }

    #[test]
    fn slug_of_punctuation_is_empty() {
        assert_eq!(slug("!!!"), "");
    }

    proptest! {
        #[test]
        fn slug_is_idempotent(s in ".{0,120}") {
            let once = slug(&s);
            prop_assert_eq!(slug(&once), once);
        }
    }
}
