// src/vcs/integrate.rs

//! Serialized merge-back of task branches.
//!
//! Merges execute inline on the coordinator loop — exactly one at a time
//! regardless of parallelism. Each merge checks out the integration
//! branch in the repository root, merges the task branch with a merge
//! commit, and falls back to an agent invocation when the merge
//! conflicts.
//!
//! The ordering here is the run's central correctness property: the
//! tasks document records `completed = true` only after the task's
//! commits are reachable from the integration branch.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::RunContext;
use crate::errors::Result;
use crate::exec::invoker::{AgentInvocation, invoke_agent};
use crate::tasks::TaskStore;
use crate::vcs::git::{GitRepo, MergeResult};

/// A finished task branch to merge.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub task_id: String,
    pub title: String,
    pub branch: String,
    /// Free-text hint from the tasks document, used only here.
    pub merge_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged,
    Failed { message: String },
}

/// How finished branches reach the integration branch. Production uses
/// [`GitIntegrator`]; tests substitute an implementation that records
/// merge order without touching git.
pub trait IntegrationBackend: Send {
    fn merge_task(
        &mut self,
        request: MergeRequest,
    ) -> Pin<Box<dyn Future<Output = MergeOutcome> + Send + '_>>;
}

pub struct GitIntegrator {
    git: GitRepo,
    ctx: Arc<RunContext>,
    store: Arc<Mutex<TaskStore>>,
}

impl GitIntegrator {
    pub fn new(git: GitRepo, ctx: Arc<RunContext>, store: Arc<Mutex<TaskStore>>) -> Self {
        Self { git, ctx, store }
    }

    async fn merge_inner(&mut self, request: &MergeRequest) -> Result<MergeOutcome> {
        let checkout = self.git.root().to_path_buf();
        let message = format!("Merge {} ({})", request.branch, request.task_id);

        self.git.checkout(&checkout, &self.ctx.base_branch).await?;

        let result = self
            .git
            .merge_no_ff(&checkout, &request.branch, &message)
            .await?;

        if let MergeResult::Conflict(files) = result {
            warn!(
                task = %request.task_id,
                conflicted = ?files,
                "merge conflict; invoking agent to resolve"
            );
            if !self.resolve_conflicts(request, &files).await? {
                self.git.abort_merge(&checkout).await?;
                return Ok(MergeOutcome::Failed {
                    message: format!(
                        "merge conflict in {} not resolved by agent",
                        files.join(", ")
                    ),
                });
            }
            self.git.conclude_merge(&checkout, &message).await?;
        }

        // Branch first, then the durable completion mark. The scheduler
        // transition happens after this method returns.
        self.git.delete_branch(&request.branch).await?;
        self.store
            .lock()
            .expect("task store lock poisoned")
            .mark_completed(&request.task_id)?;

        info!(task = %request.task_id, branch = %request.branch, "merged");
        Ok(MergeOutcome::Merged)
    }

    /// Run the agent in the integration checkout; true iff no conflicted
    /// paths remain afterwards.
    async fn resolve_conflicts(
        &self,
        request: &MergeRequest,
        files: &[String],
    ) -> Result<bool> {
        let prompt = conflict_prompt(request, files);
        let log_path = self
            .ctx
            .reports_dir()
            .join(format!("{}.log", request.task_id));

        let (_cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);
        let outcome = invoke_agent(
            AgentInvocation {
                engine: self.ctx.engine,
                prompt,
                workdir: self.git.root().to_path_buf(),
                log_path,
                unrestricted: self.ctx.unrestricted,
                stalled_timeout: self.ctx.stalled_timeout,
            },
            &mut cancel_rx,
        )
        .await?;

        if !outcome.process_succeeded() {
            return Ok(false);
        }
        Ok(self
            .git
            .conflicted_files(self.git.root())
            .await?
            .is_empty())
    }
}

impl IntegrationBackend for GitIntegrator {
    fn merge_task(
        &mut self,
        request: MergeRequest,
    ) -> Pin<Box<dyn Future<Output = MergeOutcome> + Send + '_>> {
        Box::pin(async move {
            match self.merge_inner(&request).await {
                Ok(outcome) => outcome,
                Err(e) => MergeOutcome::Failed {
                    message: format!("merge of {} failed: {e}", request.branch),
                },
            }
        })
    }
}

fn conflict_prompt(request: &MergeRequest, files: &[String]) -> String {
    let notes = request
        .merge_notes
        .as_deref()
        .map(|n| format!("\nMerge notes from the task author:\n{n}\n"))
        .unwrap_or_default();

    format!(
        "A merge of branch `{branch}` (task {id}: {title}) into the current \
branch stopped on conflicts.\n\
Conflicted files:\n{files}\n{notes}\n\
Resolve every conflict marker in these files, keeping the intent of both \
sides. Stage the resolved files with `git add`. Do not commit; do not \
touch any other file.",
        branch = request.branch,
        id = request.task_id,
        title = request.title,
        files = files
            .iter()
            .map(|f| format!("  - {f}"))
            .collect::<Vec<_>>()
            .join("\n"),
        notes = notes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_prompt_carries_files_and_merge_notes() {
        let prompt = conflict_prompt(
            &MergeRequest {
                task_id: "TASK-002".to_string(),
                title: "rework router".to_string(),
                branch: "agentdag/agent-2-rework-router".to_string(),
                merge_notes: Some("keep both route registrations".to_string()),
            },
            &["src/router.rs".to_string()],
        );
        assert!(prompt.contains("src/router.rs"));
        assert!(prompt.contains("keep both route registrations"));
        assert!(prompt.contains("TASK-002"));
    }
}
