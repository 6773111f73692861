// src/exec/supervisor.rs

//! One task attempt, end to end.
//!
//! A supervisor owns its worktree for its lifetime and shares nothing
//! with other supervisors except the repository, the artifact writer,
//! and (indirectly, via events) the scheduler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::artifacts::{ArtifactWriter, TaskReport, notes_tail};
use crate::config::RunContext;
use crate::engine::{RuntimeEvent, SupervisorOutcome, TaskAssignment};
use crate::errors::Result;
use crate::exec::classify::{FailureKind, classify_failure};
use crate::exec::invoker::{AgentInvocation, InvocationOutcome, invoke_agent};
use crate::vcs::git::GitRepo;
use crate::vcs::worktree::{AgentWorktree, WorktreeManager};

/// Fixed delay between agent invocation retries.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed message for the auto-commit of agent leftovers.
const AUTO_COMMIT_MESSAGE: &str = "agentdag: commit remaining agent changes";

/// Filenames reserved by host filesystems; committing them fails on
/// hostile platforms, so they are deleted before the auto-commit.
const RESERVED_FILENAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Everything a supervisor needs besides its assignment.
#[derive(Debug)]
pub struct SupervisorDeps {
    pub ctx: Arc<RunContext>,
    pub git: GitRepo,
    pub worktrees: WorktreeManager,
    pub artifacts: ArtifactWriter,
}

/// Drive one task attempt and report the outcome to the coordinator.
///
/// Every exit path sends exactly one `SupervisorFinished` event.
pub async fn run_supervisor(
    deps: Arc<SupervisorDeps>,
    assignment: TaskAssignment,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let task_id = assignment.id.clone();
    let outcome = match supervise(&deps, &assignment, &mut cancel_rx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(task = %task_id, error = %err, "supervisor error");
            let message = err.to_string();
            write_failure_report(&deps, &assignment, None, "failed", FailureKind::Internal, &message);
            SupervisorOutcome::Failed {
                kind: FailureKind::Internal,
                message,
            }
        }
    };

    let _ = runtime_tx
        .send(RuntimeEvent::SupervisorFinished {
            task: task_id,
            outcome,
        })
        .await;
}

async fn supervise(
    deps: &SupervisorDeps,
    assignment: &TaskAssignment,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<SupervisorOutcome> {
    let ctx = &deps.ctx;
    info!(
        task = %assignment.id,
        slot = assignment.slot,
        "supervising task"
    );

    let worktree = deps
        .worktrees
        .create(assignment.slot, &assignment.title)
        .await?;

    stage_context_files(ctx, &worktree)?;

    let prompt = task_prompt(assignment);
    let log_path = deps.artifacts.log_path(&assignment.id);

    // Agent invocation with retries. External signatures and
    // cancellation are final; internal failures burn an attempt.
    let max_attempts = 1 + ctx.max_retries;
    let mut attempt = 0;
    let invocation: InvocationOutcome = loop {
        attempt += 1;
        let outcome = invoke_agent(
            AgentInvocation {
                engine: ctx.engine,
                prompt: prompt.clone(),
                workdir: worktree.path.clone(),
                log_path: log_path.clone(),
                unrestricted: ctx.unrestricted,
                stalled_timeout: ctx.stalled_timeout,
            },
            cancel_rx,
        )
        .await?;

        if outcome.cancelled {
            return finish_cancelled(deps, assignment, &worktree).await;
        }
        if outcome.process_succeeded() {
            break outcome;
        }

        let line = outcome.observation.classification_line().map(str::to_string);
        let kind = if outcome.stalled {
            // A stall is cancelled locally and counts as internal.
            FailureKind::Internal
        } else {
            classify_failure(line.as_deref())
        };

        warn!(
            task = %assignment.id,
            attempt,
            kind = ?kind,
            exit_code = ?outcome.exit_code,
            "agent attempt failed"
        );

        if kind == FailureKind::External || attempt >= max_attempts {
            let message = line.unwrap_or_else(|| {
                if outcome.stalled {
                    "agent stalled (no output within timeout)".to_string()
                } else {
                    format!("agent exited with {:?}", outcome.exit_code)
                }
            });
            return finish_failed(deps, assignment, &worktree, kind, &message, outcome).await;
        }

        // Fixed delay, still responsive to cancellation.
        tokio::select! {
            _ = tokio::time::sleep(RETRY_DELAY) => {}
            res = cancel_rx.changed() => {
                if res.is_ok() && *cancel_rx.borrow() {
                    return finish_cancelled(deps, assignment, &worktree).await;
                }
            }
        }
    };

    let notes = harvest_context_files(deps, &worktree).await?;

    // Agent reported success; anything uncommitted is committed on its
    // behalf so the work is not lost in teardown.
    if deps.git.is_dirty(&worktree.path).await? {
        remove_reserved_files(deps, &worktree).await?;
        deps.git
            .commit_all(&worktree.path, AUTO_COMMIT_MESSAGE)
            .await?;
        info!(task = %assignment.id, "auto-committed leftover changes");
    }

    let commits = deps
        .git
        .count_commits(&ctx.base_branch, &worktree.branch)
        .await?;
    if commits == 0 {
        return finish_failed(
            deps,
            assignment,
            &worktree,
            FailureKind::Internal,
            "no commits produced",
            invocation,
        )
        .await;
    }

    let changed = deps
        .git
        .changed_files(&ctx.base_branch, &worktree.branch)
        .await?;
    deps.artifacts.append_progress(&assignment.id, &notes)?;

    deps.artifacts.write_report(&TaskReport {
        id: assignment.id.clone(),
        title: assignment.title.clone(),
        branch: worktree.branch.clone(),
        status: "success".to_string(),
        commit_count: commits,
        changed_files: changed.join(","),
        notes_tail: notes,
        failure_type: None,
        error: None,
        usage: invocation.observation.usage.clone(),
        timestamp: now_rfc3339(),
    })?;

    // Branch survives for the integrator; only the checkout goes away.
    deps.worktrees.teardown(&worktree, false).await?;

    Ok(SupervisorOutcome::Success {
        branch: worktree.branch.clone(),
    })
}

/// The agent reads the tasks document for context (the run-root copy
/// stays authoritative) and appends to a progress notes file that the
/// report later harvests.
fn stage_context_files(ctx: &RunContext, worktree: &AgentWorktree) -> Result<()> {
    std::fs::copy(ctx.tasks_path(), worktree.path.join("tasks.toml"))?;
    let notes = worktree.path.join("progress.txt");
    if !notes.exists() {
        std::fs::write(&notes, "")?;
    }
    Ok(())
}

/// Read the notes tail, then delete the staged context files again
/// (while still untracked). Left in place they would keep the worktree
/// permanently dirty — blocking clean teardown — and the auto-commit
/// would carry them into the integration branch. A copy the agent
/// committed despite instructions is simply part of its commits and is
/// ignored here; the run-root documents stay authoritative either way.
async fn harvest_context_files(
    deps: &SupervisorDeps,
    worktree: &AgentWorktree,
) -> Result<Vec<String>> {
    let notes = notes_tail(&worktree.path.join("progress.txt"));
    let untracked = deps.git.untracked_paths(&worktree.path).await?;
    for name in ["tasks.toml", "progress.txt"] {
        if untracked.iter().any(|p| p == name) {
            let _ = std::fs::remove_file(worktree.path.join(name));
        }
    }
    Ok(notes)
}

async fn finish_cancelled(
    deps: &SupervisorDeps,
    assignment: &TaskAssignment,
    worktree: &AgentWorktree,
) -> Result<SupervisorOutcome> {
    warn!(task = %assignment.id, "task cancelled");
    let _ = harvest_context_files(deps, worktree).await;
    write_failure_report(
        deps,
        assignment,
        Some(worktree),
        "cancelled",
        FailureKind::Internal,
        "cancelled by coordinator",
    );
    deps.worktrees.teardown(worktree, true).await?;
    Ok(SupervisorOutcome::Cancelled)
}

async fn finish_failed(
    deps: &SupervisorDeps,
    assignment: &TaskAssignment,
    worktree: &AgentWorktree,
    kind: FailureKind,
    message: &str,
    invocation: InvocationOutcome,
) -> Result<SupervisorOutcome> {
    let notes = harvest_context_files(deps, worktree).await?;
    deps.artifacts.append_progress(&assignment.id, &notes)?;

    let commits = deps
        .git
        .count_commits(&deps.ctx.base_branch, &worktree.branch)
        .await
        .unwrap_or(0);

    deps.artifacts.write_report(&TaskReport {
        id: assignment.id.clone(),
        title: assignment.title.clone(),
        branch: worktree.branch.clone(),
        status: "failed".to_string(),
        commit_count: commits,
        changed_files: String::new(),
        notes_tail: notes,
        failure_type: Some(kind),
        error: Some(message.to_string()),
        usage: invocation.observation.usage.clone(),
        timestamp: now_rfc3339(),
    })?;

    deps.worktrees.teardown(worktree, true).await?;

    Ok(SupervisorOutcome::Failed {
        kind,
        message: message.to_string(),
    })
}

/// Failure report for paths where no worktree exists (or teardown is
/// handled elsewhere). Best-effort: reporting must not mask the failure.
fn write_failure_report(
    deps: &SupervisorDeps,
    assignment: &TaskAssignment,
    worktree: Option<&AgentWorktree>,
    status: &str,
    kind: FailureKind,
    message: &str,
) {
    let branch = worktree
        .map(|w| w.branch.clone())
        .unwrap_or_else(|| deps.worktrees.branch_for(assignment.slot, &assignment.title));

    let report = TaskReport {
        id: assignment.id.clone(),
        title: assignment.title.clone(),
        branch,
        status: status.to_string(),
        commit_count: 0,
        changed_files: String::new(),
        notes_tail: Vec::new(),
        failure_type: Some(kind),
        error: Some(message.to_string()),
        usage: None,
        timestamp: now_rfc3339(),
    };
    if let Err(e) = deps.artifacts.write_report(&report) {
        error!(task = %assignment.id, error = %e, "failed to write task report");
    }
}

/// Delete any dirty path whose filename is reserved by the host
/// filesystem, so the auto-commit cannot fail on it.
async fn remove_reserved_files(deps: &SupervisorDeps, worktree: &AgentWorktree) -> Result<()> {
    for rel in deps.git.dirty_paths(&worktree.path).await? {
        if is_reserved_filename(&rel) {
            let full = worktree.path.join(&rel);
            warn!(path = %rel, "removing file with reserved name before auto-commit");
            let _ = std::fs::remove_file(full);
        }
    }
    Ok(())
}

fn is_reserved_filename(rel: &str) -> bool {
    let name = Path::new(rel)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let stem = name.split('.').next().unwrap_or("");
    RESERVED_FILENAMES
        .iter()
        .any(|r| stem.eq_ignore_ascii_case(r))
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn task_prompt(assignment: &TaskAssignment) -> String {
    let touches = if assignment.touches.is_empty() {
        String::new()
    } else {
        format!(
            "\nFiles likely involved (advisory):\n{}\n",
            assignment
                .touches
                .iter()
                .map(|t| format!("  - {t}"))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    format!(
        "Implement exactly one task from the plan in tasks.toml.\n\n\
Task id: {id}\nTitle: {title}\n{touches}\n\
Rules:\n\
- Implement only this task; the rest of tasks.toml is context.\n\
- Do not modify tasks.toml and do not mark any task completed.\n\
- Commit your work with git; leave the working tree clean when done.\n\
- Append a short note describing what you did to progress.txt.",
        id = assignment.id,
        title = assignment.title,
        touches = touches,
    )
}
