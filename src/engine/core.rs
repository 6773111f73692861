// src/engine/core.rs

//! Pure core of the run coordinator.
//!
//! This is a synchronous, deterministic state machine that consumes
//! [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of [`CoreCommand`]s describing what the IO shell should do
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for
//! channels, timers, supervisor spawning, and merge execution. The core
//! has no channels, no Tokio types, and performs no IO, so the whole
//! scheduling policy — bounded parallelism, graceful stop, the iteration
//! cap, deadlock detection — is unit-testable without processes or git.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dag::Scheduler;
use crate::engine::{
    CoreCommand, CoreStep, RunVerdict, RuntimeEvent, SupervisorOutcome, TaskAssignment, TaskId,
};
use crate::exec::FailureKind;
use crate::tasks::TaskSet;
use crate::vcs::integrate::{MergeOutcome, MergeRequest};

#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    /// Task metadata (titles, touches, merge notes) for assignments.
    meta: TaskSet,
    parallelism: usize,
    max_iterations: u64,
    external_fail_timeout: Duration,

    /// Graceful-stop mode: no new dispatches; running work is awaited
    /// up to the deadline, then cancelled.
    stopping: bool,
    stop_deadline_armed: bool,
    stop_reason: Option<String>,

    /// Monotonically increasing agent slot number.
    slot_counter: u64,
    /// Dispatch batches issued so far (for the iteration cap).
    iterations: u64,
    /// Merges handed to the shell whose outcome has not come back yet.
    merges_in_flight: usize,
    failed_tasks: Vec<TaskId>,
}

impl CoreRuntime {
    pub fn new(
        scheduler: Scheduler,
        meta: TaskSet,
        parallelism: usize,
        max_iterations: u64,
        external_fail_timeout: Duration,
    ) -> Self {
        Self {
            scheduler,
            meta,
            parallelism,
            max_iterations,
            external_fail_timeout,
            stopping: false,
            stop_deadline_armed: false,
            stop_reason: None,
            slot_counter: 0,
            iterations: 0,
            merges_in_flight: 0,
            failed_tasks: Vec::new(),
        }
    }

    /// Expose the scheduler for diagnostics (dry-run, tests).
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Initial step before any event: dispatch the first batch, or exit
    /// immediately when there is nothing to do (e.g. every task already
    /// completed on disk — a resumed, finished run is a no-op).
    pub fn bootstrap(&mut self) -> CoreStep {
        let mut step = CoreStep::default();
        self.advance(&mut step);
        step
    }

    /// Handle a single runtime event.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let mut step = CoreStep::default();

        match event {
            RuntimeEvent::SupervisorFinished { task, outcome } => {
                self.on_supervisor_finished(task, outcome, &mut step)
            }
            RuntimeEvent::MergeResolved { task, outcome } => {
                self.on_merge_resolved(task, outcome)
            }
            RuntimeEvent::StopDeadlineElapsed => {
                if self.scheduler.count_running() > 0 {
                    warn!("graceful-stop deadline elapsed; cancelling remaining tasks");
                    step.commands.push(CoreCommand::CancelRunning);
                }
            }
            RuntimeEvent::ShutdownRequested => {
                info!("shutdown requested; entering graceful stop");
                self.enter_stopping("interrupted".to_string(), &mut step);
                step.commands.push(CoreCommand::CancelRunning);
            }
        }

        self.advance(&mut step);
        step
    }

    fn on_supervisor_finished(
        &mut self,
        task: TaskId,
        outcome: SupervisorOutcome,
        step: &mut CoreStep,
    ) {
        match outcome {
            SupervisorOutcome::Success { branch } => {
                // The task stays `Running` (and keeps its mutexes) until
                // the merge resolves; completion on disk must precede the
                // scheduler transition.
                let meta = self.meta.get(&task);
                self.merges_in_flight += 1;
                step.commands.push(CoreCommand::MergeBranch(MergeRequest {
                    task_id: task.clone(),
                    title: meta.map(|t| t.title.clone()).unwrap_or_default(),
                    branch,
                    merge_notes: meta.and_then(|t| t.merge_notes.clone()),
                }));
            }
            SupervisorOutcome::Failed { kind, message } => {
                warn!(task = %task, ?kind, %message, "task failed");
                self.scheduler.fail(&task);
                self.failed_tasks.push(task.clone());
                if kind == FailureKind::External && !self.stopping {
                    self.enter_stopping(
                        format!("external failure in {task}: {message}"),
                        step,
                    );
                }
            }
            SupervisorOutcome::Cancelled => {
                self.scheduler.fail(&task);
                self.failed_tasks.push(task);
            }
        }
    }

    fn on_merge_resolved(&mut self, task: TaskId, outcome: MergeOutcome) {
        self.merges_in_flight = self.merges_in_flight.saturating_sub(1);
        match outcome {
            MergeOutcome::Merged => {
                info!(task = %task, "task complete");
                self.scheduler.complete(&task);
            }
            MergeOutcome::Failed { message } => {
                warn!(task = %task, %message, "merge failed; task failed");
                self.scheduler.fail(&task);
                self.failed_tasks.push(task);
            }
        }
    }

    fn enter_stopping(&mut self, reason: String, step: &mut CoreStep) {
        self.stopping = true;
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
        if !self.stop_deadline_armed {
            self.stop_deadline_armed = true;
            step.commands
                .push(CoreCommand::ScheduleStopDeadline(self.external_fail_timeout));
        }
    }

    /// Dispatch ready work and evaluate termination. Runs after every
    /// event (and once at bootstrap).
    fn advance(&mut self, step: &mut CoreStep) {
        if !self.stopping {
            self.dispatch(step);
        }

        let running = self.scheduler.count_running();
        let pending = self.scheduler.count_pending();

        if running > 0 || self.merges_in_flight > 0 {
            return;
        }

        if self.stopping {
            let reason = self
                .stop_reason
                .clone()
                .unwrap_or_else(|| "stopped".to_string());
            step.verdict = Some(RunVerdict::Failed(reason));
            return;
        }

        if pending == 0 {
            step.verdict = Some(if self.failed_tasks.is_empty() {
                RunVerdict::Success
            } else {
                RunVerdict::Failed(format!(
                    "{} task(s) failed: {}",
                    self.failed_tasks.len(),
                    self.failed_tasks.join(", ")
                ))
            });
            return;
        }

        if self.scheduler.deadlock() {
            let blocked: Vec<String> = self
                .scheduler
                .pending_ids()
                .iter()
                .map(|id| self.scheduler.explain_block(id))
                .collect();
            step.commands.push(CoreCommand::ReportBlocked(blocked));
            step.verdict = Some(RunVerdict::Failed(
                "deadlock: pending tasks with nothing runnable".to_string(),
            ));
        }
    }

    fn dispatch(&mut self, step: &mut CoreStep) {
        let slots = self
            .parallelism
            .saturating_sub(self.scheduler.count_running());
        if slots == 0 {
            return;
        }

        let ready = self.scheduler.ready();
        let mut assignments = Vec::new();

        for id in ready.into_iter().take(slots) {
            // Mutexes are acquired here; a refusal (late contention
            // within this batch) just leaves the task for a later batch.
            if !self.scheduler.start(&id) {
                continue;
            }
            self.slot_counter += 1;
            let meta = self.meta.get(&id);
            assignments.push(TaskAssignment {
                id: id.clone(),
                title: meta.map(|t| t.title.clone()).unwrap_or_default(),
                slot: self.slot_counter,
                touches: meta.map(|t| t.touches.clone()).unwrap_or_default(),
            });
        }

        if assignments.is_empty() {
            return;
        }

        debug!(
            count = assignments.len(),
            iteration = self.iterations + 1,
            "dispatching ready tasks"
        );
        self.iterations += 1;
        step.commands.push(CoreCommand::DispatchTasks(assignments));

        if self.max_iterations > 0 && self.iterations >= self.max_iterations {
            warn!(
                iterations = self.iterations,
                "iteration cap reached; entering graceful stop"
            );
            self.enter_stopping("iteration cap reached".to_string(), step);
        }
    }
}
