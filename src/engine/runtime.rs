// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::engine::{CoreCommand, CoreStep, RunVerdict, RuntimeEvent};
use crate::errors::{AgentDagError, Result};
use crate::exec::SupervisorBackend;
use crate::vcs::integrate::IntegrationBackend;

use super::core::CoreRuntime;

/// Async IO shell around [`CoreRuntime`].
///
/// Reads events from the channel, feeds them to the core, and executes
/// the resulting commands: spawning supervisors through the
/// `SupervisorBackend`, merging through the `IntegrationBackend`
/// (inline, so merges are totally ordered), arming the graceful-stop
/// timer, and cancelling running work.
pub struct Runtime<S: SupervisorBackend, I: IntegrationBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// For timer events the shell itself schedules.
    event_tx: mpsc::Sender<RuntimeEvent>,
    supervisors: S,
    integrator: I,
    /// Events produced while executing commands (merge outcomes); they
    /// are processed before anything new is read from the channel.
    immediate: VecDeque<RuntimeEvent>,
}

impl<S: SupervisorBackend, I: IntegrationBackend> fmt::Debug for Runtime<S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

impl<S: SupervisorBackend, I: IntegrationBackend> Runtime<S, I> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        supervisors: S,
        integrator: I,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            supervisors,
            integrator,
            immediate: VecDeque::new(),
        }
    }

    /// Main event loop. Returns the run verdict.
    pub async fn run(mut self) -> Result<RunVerdict> {
        info!("run coordinator started");

        let mut step = self.core.bootstrap();
        loop {
            if let Some(verdict) = self.execute(step).await? {
                info!(?verdict, "run coordinator finished");
                return Ok(verdict);
            }

            let event = match self.immediate.pop_front() {
                Some(e) => e,
                None => match self.event_rx.recv().await {
                    Some(e) => e,
                    None => {
                        return Err(AgentDagError::Other(anyhow::anyhow!(
                            "runtime event channel closed unexpectedly"
                        )));
                    }
                },
            };

            debug!(?event, "runtime received event");
            step = self.core.step(event);
        }
    }

    /// Execute the commands of one core step; a verdict ends the run.
    async fn execute(&mut self, step: CoreStep) -> Result<Option<RunVerdict>> {
        for command in step.commands {
            match command {
                CoreCommand::DispatchTasks(assignments) => {
                    let ids: Vec<_> = assignments.iter().map(|a| a.id.as_str()).collect();
                    debug!(?ids, "spawning supervisors");
                    self.supervisors.spawn_supervisors(assignments).await?;
                }
                CoreCommand::MergeBranch(request) => {
                    let task = request.task_id.clone();
                    let outcome = self.integrator.merge_task(request).await;
                    self.immediate
                        .push_back(RuntimeEvent::MergeResolved { task, outcome });
                }
                CoreCommand::ScheduleStopDeadline(delay) => {
                    let tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(RuntimeEvent::StopDeadlineElapsed).await;
                    });
                }
                CoreCommand::CancelRunning => {
                    self.supervisors.cancel_all().await;
                }
                CoreCommand::ReportBlocked(lines) => {
                    error!("run is blocked; no remaining task can start");
                    for line in &lines {
                        println!("blocked: {line}");
                    }
                }
            }
        }

        Ok(step.verdict)
    }
}
