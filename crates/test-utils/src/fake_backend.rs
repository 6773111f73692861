use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use agentdag::engine::{RuntimeEvent, SupervisorOutcome, TaskAssignment};
use agentdag::errors::Result;
use agentdag::exec::{FailureKind, SupervisorBackend};
use agentdag::tasks::TaskStore;
use agentdag::vcs::integrate::{IntegrationBackend, MergeOutcome, MergeRequest};

/// Scripted behaviour for one task in the fake backend.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report success (with a synthetic branch name) after a short delay.
    Succeed,
    /// Report failure with this kind and message.
    Fail(FailureKind, String),
    /// Never finish on its own; only `cancel_all` ends it.
    Hang,
}

/// Concurrency bookkeeping shared with assertions in tests.
#[derive(Debug, Default)]
pub struct Concurrency {
    running: usize,
    pub max_observed: usize,
}

/// A fake supervisor backend that:
/// - records which tasks were spawned, in order
/// - tracks the maximum number of tasks running at once
/// - completes tasks according to a per-task [`Script`]
///   (default: succeed).
pub struct FakeSupervisorBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    pub spawned: Arc<Mutex<Vec<String>>>,
    pub concurrency: Arc<Mutex<Concurrency>>,
    scripts: HashMap<String, Script>,
    hanging: Arc<Mutex<Vec<String>>>,
    /// Simulated task duration; gives tests a window to observe overlap.
    delay: Duration,
}

impl FakeSupervisorBackend {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            spawned: Arc::new(Mutex::new(Vec::new())),
            concurrency: Arc::new(Mutex::new(Concurrency::default())),
            scripts: HashMap::new(),
            hanging: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::from_millis(20),
        }
    }

    pub fn script(mut self, task: &str, script: Script) -> Self {
        self.scripts.insert(task.to_string(), script);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn spawned_tasks(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.concurrency.lock().unwrap().max_observed
    }
}

impl SupervisorBackend for FakeSupervisorBackend {
    fn spawn_supervisors(
        &mut self,
        assignments: Vec<TaskAssignment>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let spawned = Arc::clone(&self.spawned);
        let concurrency = Arc::clone(&self.concurrency);
        let hanging = Arc::clone(&self.hanging);
        let scripts = self.scripts.clone();
        let delay = self.delay;

        Box::pin(async move {
            for assignment in assignments {
                let id = assignment.id.clone();
                spawned.lock().unwrap().push(id.clone());

                let script = scripts.get(&id).cloned().unwrap_or(Script::Succeed);
                if matches!(script, Script::Hang) {
                    // Counts as running until cancel_all reaps it.
                    let mut c = concurrency.lock().unwrap();
                    c.running += 1;
                    c.max_observed = c.max_observed.max(c.running);
                    drop(c);
                    hanging.lock().unwrap().push(id);
                    continue;
                }

                let tx = tx.clone();
                let concurrency = Arc::clone(&concurrency);
                tokio::spawn(async move {
                    {
                        let mut c = concurrency.lock().unwrap();
                        c.running += 1;
                        c.max_observed = c.max_observed.max(c.running);
                    }
                    tokio::time::sleep(delay).await;
                    concurrency.lock().unwrap().running -= 1;

                    let outcome = match script {
                        Script::Succeed => SupervisorOutcome::Success {
                            branch: format!("agentdag/agent-0-{}", id.to_lowercase()),
                        },
                        Script::Fail(kind, message) => {
                            SupervisorOutcome::Failed { kind, message }
                        }
                        Script::Hang => unreachable!("hanging tasks never spawn"),
                    };
                    let _ = tx
                        .send(RuntimeEvent::SupervisorFinished { task: id, outcome })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let hanging = Arc::clone(&self.hanging);
        let concurrency = Arc::clone(&self.concurrency);

        Box::pin(async move {
            let cancelled: Vec<String> = hanging.lock().unwrap().drain(..).collect();
            for id in cancelled {
                concurrency.lock().unwrap().running -= 1;
                let _ = tx
                    .send(RuntimeEvent::SupervisorFinished {
                        task: id,
                        outcome: SupervisorOutcome::Cancelled,
                    })
                    .await;
            }
        })
    }
}

/// A fake integration backend that records merge order and completes
/// tasks against an optional shared task store, like the real one.
pub struct FakeIntegrator {
    pub merged: Arc<Mutex<Vec<String>>>,
    failures: HashMap<String, String>,
    store: Option<Arc<Mutex<TaskStore>>>,
}

impl FakeIntegrator {
    pub fn new() -> Self {
        Self {
            merged: Arc::new(Mutex::new(Vec::new())),
            failures: HashMap::new(),
            store: None,
        }
    }

    /// Mark completions in this store on merge, as the real integrator
    /// does.
    pub fn with_store(mut self, store: Arc<Mutex<TaskStore>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Scripted merge failure for one task.
    pub fn fail_merge(mut self, task: &str, message: &str) -> Self {
        self.failures.insert(task.to_string(), message.to_string());
        self
    }

    pub fn merged_tasks(&self) -> Vec<String> {
        self.merged.lock().unwrap().clone()
    }
}

impl Default for FakeIntegrator {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationBackend for FakeIntegrator {
    fn merge_task(
        &mut self,
        request: MergeRequest,
    ) -> Pin<Box<dyn Future<Output = MergeOutcome> + Send + '_>> {
        Box::pin(async move {
            if let Some(message) = self.failures.get(&request.task_id) {
                return MergeOutcome::Failed {
                    message: message.clone(),
                };
            }

            if let Some(store) = &self.store {
                store
                    .lock()
                    .unwrap()
                    .mark_completed(&request.task_id)
                    .expect("marking completion in fake integrator");
            }
            self.merged.lock().unwrap().push(request.task_id);
            MergeOutcome::Merged
        })
    }
}
