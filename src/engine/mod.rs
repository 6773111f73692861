// src/engine/mod.rs

//! Run coordination engine.
//!
//! This module ties together:
//! - the DAG scheduler
//! - supervisor dispatch with bounded parallelism
//! - serialized merge-back of finished task branches
//! - the failure policy (retries stay in the supervisor; an external
//!   failure puts the whole run into graceful stop)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::exec::FailureKind;
use crate::vcs::integrate::{MergeOutcome, MergeRequest};

/// Canonical task id type used throughout the engine.
pub type TaskId = String;

/// What a supervisor reported for its task attempt.
#[derive(Debug, Clone)]
pub enum SupervisorOutcome {
    /// The agent produced commits on `branch`; ready to merge.
    Success { branch: String },
    /// All attempts exhausted (or an external signature appeared).
    Failed { kind: FailureKind, message: String },
    /// Cancelled by the coordinator (graceful stop or shutdown).
    Cancelled,
}

/// A task the core wants a supervisor spawned for.
#[derive(Debug, Clone)]
pub struct TaskAssignment {
    pub id: TaskId,
    pub title: String,
    /// Monotonically increasing per-run agent slot; part of the branch name.
    pub slot: u64,
    /// Advisory paths hint passed into the prompt.
    pub touches: Vec<String>,
}

/// Events flowing into the coordinator from supervisors, the integrator,
/// and timers.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A supervisor finished its task attempt.
    SupervisorFinished {
        task: TaskId,
        outcome: SupervisorOutcome,
    },
    /// The (serialized) merge of a finished task concluded.
    MergeResolved {
        task: TaskId,
        outcome: MergeOutcome,
    },
    /// The graceful-stop deadline elapsed with supervisors still running.
    StopDeadlineElapsed,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Spawn supervisors for these tasks.
    DispatchTasks(Vec<TaskAssignment>),
    /// Merge this finished task branch (executed inline, so merges are
    /// totally ordered across the run).
    MergeBranch(MergeRequest),
    /// Arm the graceful-stop deadline timer.
    ScheduleStopDeadline(Duration),
    /// Cancel every running supervisor.
    CancelRunning,
    /// Print why each remaining task cannot run (deadlock report).
    ReportBlocked(Vec<String>),
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunVerdict {
    /// Every task is done; exit 0.
    Success,
    /// Task failure, deadlock, external stop, or interruption; exit 1.
    Failed(String),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Default)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// When set, the run is over and the shell should stop.
    pub verdict: Option<RunVerdict>,
}

pub mod core;
pub mod runtime;

pub use self::core::CoreRuntime;
pub use self::runtime::Runtime;
