// src/config.rs

//! Per-run configuration.
//!
//! `RunContext` is created once at startup from the CLI arguments and passed
//! explicitly to every component that needs it. Nothing in the crate reads
//! run configuration from ambient state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{EngineKind, TuningArgs};
use crate::errors::{AgentDagError, Result};

/// Immutable per-run configuration.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Stable identifier from the requirements document; names the run dir.
    pub prd_id: String,
    /// `<run_root>/<prd_id>`.
    pub run_dir: PathBuf,
    /// Repository the agents work in (current directory at startup).
    pub repo_root: PathBuf,
    /// Base and integration branch, from the TaskSet's `branchName`.
    pub base_branch: String,
    pub parallelism: usize,
    pub max_retries: u32,
    pub stalled_timeout: Duration,
    pub external_fail_timeout: Duration,
    /// 0 = unbounded.
    pub max_iterations: u64,
    pub engine: EngineKind,
    pub unrestricted: bool,
    pub branch_prefix: String,
}

impl RunContext {
    pub fn new(
        prd_id: String,
        base_branch: String,
        repo_root: PathBuf,
        tuning: &TuningArgs,
    ) -> Result<Self> {
        if tuning.parallel == 0 {
            return Err(AgentDagError::Precondition(
                "--parallel must be >= 1".to_string(),
            ));
        }

        let run_dir = PathBuf::from(&tuning.run_root).join(&prd_id);

        Ok(Self {
            prd_id,
            run_dir,
            repo_root,
            base_branch,
            parallelism: tuning.parallel,
            max_retries: tuning.max_retries,
            stalled_timeout: Duration::from_secs(tuning.stalled_timeout),
            external_fail_timeout: Duration::from_secs(tuning.external_fail_timeout),
            max_iterations: tuning.max_iterations,
            engine: tuning.engine,
            unrestricted: tuning.unrestricted,
            branch_prefix: tuning.branch_prefix.clone(),
        })
    }

    /// Directory that holds per-task agent worktrees for this run.
    pub fn worktree_root(&self) -> PathBuf {
        self.run_dir.join("worktrees")
    }

    /// Path of the authoritative tasks file.
    pub fn tasks_path(&self) -> PathBuf {
        self.run_dir.join("tasks.toml")
    }

    /// Directory holding per-task reports and logs.
    pub fn reports_dir(&self) -> PathBuf {
        self.run_dir.join("reports")
    }
}

/// Fail fast if the engine binary is not on PATH.
pub fn check_engine_binary(engine: EngineKind) -> Result<()> {
    let binary = engine.binary();
    which::which(binary).map_err(|_| {
        AgentDagError::Precondition(format!(
            "engine binary '{binary}' not found on PATH"
        ))
    })?;
    Ok(())
}

/// Fail fast if the run directory cannot be created or written.
pub fn check_run_dir_writable(run_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(run_dir).map_err(|e| {
        AgentDagError::Precondition(format!(
            "run directory {} is not writable: {e}",
            run_dir.display()
        ))
    })?;

    let probe = run_dir.join(".write-probe");
    std::fs::write(&probe, b"ok").map_err(|e| {
        AgentDagError::Precondition(format!(
            "run directory {} is not writable: {e}",
            run_dir.display()
        ))
    })?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}
