// src/exec/backend.rs

//! Pluggable supervisor backend abstraction.
//!
//! The runtime talks to a `SupervisorBackend` instead of spawning
//! supervisors directly. This makes it easy to swap in a fake backend in
//! tests (which completes tasks without processes or git) while keeping
//! the production implementation here.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::engine::{RuntimeEvent, TaskAssignment};
use crate::errors::Result;
use crate::exec::supervisor::{SupervisorDeps, run_supervisor};

/// Trait abstracting how assigned tasks are supervised.
///
/// Production code uses [`RealSupervisorBackend`]; tests provide their
/// own implementation that directly emits `SupervisorFinished` events.
pub trait SupervisorBackend: Send {
    /// Spawn a supervisor per assignment.
    fn spawn_supervisors(
        &mut self,
        assignments: Vec<TaskAssignment>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Cancel every running supervisor. Each one still reports a
    /// terminal `SupervisorFinished` event.
    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Internal handle for one running supervisor.
struct ActiveSupervisor {
    cancel: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Real supervisor backend used in production. One tokio task per
/// supervised task; cancellation propagates through a per-task watch
/// channel down to the agent process.
pub struct RealSupervisorBackend {
    deps: Arc<SupervisorDeps>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    active: HashMap<String, ActiveSupervisor>,
}

impl RealSupervisorBackend {
    pub fn new(deps: SupervisorDeps, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            deps: Arc::new(deps),
            runtime_tx,
            active: HashMap::new(),
        }
    }

    fn reap_finished(&mut self) {
        self.active.retain(|task, sup| {
            let done = sup.handle.is_finished();
            if done {
                debug!(task = %task, "supervisor task reaped");
            }
            !done
        });
    }
}

impl SupervisorBackend for RealSupervisorBackend {
    fn spawn_supervisors(
        &mut self,
        assignments: Vec<TaskAssignment>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.reap_finished();

            for assignment in assignments {
                let id = assignment.id.clone();
                let (cancel_tx, cancel_rx) = watch::channel(false);
                let deps = Arc::clone(&self.deps);
                let tx = self.runtime_tx.clone();

                // A supervisor that panics must still surface a terminal
                // event, or the coordinator would wait on it forever.
                let inner = tokio::spawn(run_supervisor(deps, assignment, tx.clone(), cancel_rx));
                let reaper_id = id.clone();
                let handle = tokio::spawn(async move {
                    if let Err(join_err) = inner.await {
                        let _ = tx
                            .send(RuntimeEvent::SupervisorFinished {
                                task: reaper_id,
                                outcome: crate::engine::SupervisorOutcome::Failed {
                                    kind: crate::exec::FailureKind::Internal,
                                    message: format!("supervisor crashed: {join_err}"),
                                },
                            })
                            .await;
                    }
                });

                self.active.insert(
                    id,
                    ActiveSupervisor {
                        cancel: cancel_tx,
                        handle,
                    },
                );
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.reap_finished();
            for (task, sup) in self.active.iter() {
                if !sup.handle.is_finished() {
                    info!(task = %task, "cancelling running supervisor");
                    let _ = sup.cancel.send(true);
                }
            }
        })
    }
}
