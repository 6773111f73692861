// src/errors.rs

//! Crate-wide error type and helpers.
//!
//! Exit-code policy (applied in `main.rs`):
//! - `Validation` and `Precondition` exit with code 2 — the run never began.
//! - Everything else exits with code 1.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentDagError {
    /// Malformed tasks file or requirements document. Carries the full
    /// list of problems so the user can fix them in one pass.
    #[error("validation failed:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    /// Missing engine binary, unwritable run directory, and the like.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A git operation exited non-zero.
    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run finished but at least one task failed, a deadlock was
    /// declared, or an external failure stopped the run.
    #[error("run failed: {0}")]
    RunFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentDagError {
    /// Process exit code for this error per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentDagError::Validation(_) | AgentDagError::Precondition(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentDagError>;
