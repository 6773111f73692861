// src/dag/scheduler.rs

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::dag::graph::TaskDag;
use crate::dag::mutex::MutexRegistry;
use crate::tasks::TaskSet;

/// In-memory state of a task within the current run.
///
/// Legal transitions: `Pending → Running → Done`,
/// `Pending → Running → Failed`, and `Failed → Pending` on explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
struct SchedEntry {
    deps: Vec<String>,
    mutexes: Vec<String>,
    state: TaskState,
}

/// Pure in-memory scheduler: task states, the ready set, deadlock
/// detection, and block diagnostics.
///
/// The scheduler exclusively owns task states and the mutex registry. It
/// knows nothing about worktrees, agents, or git; side effects are limited
/// to the registry it owns.
#[derive(Debug)]
pub struct Scheduler {
    graph: TaskDag,
    /// Task ids in document order; `ready()` iterates in this order so
    /// scheduling is deterministic for a given task set.
    order: Vec<String>,
    entries: HashMap<String, SchedEntry>,
    mutexes: MutexRegistry,
}

impl Scheduler {
    /// Construct a scheduler from a validated [`TaskSet`].
    ///
    /// Tasks persisted as completed start out `Done`; everything else
    /// starts `Pending`.
    pub fn init(set: &TaskSet) -> Self {
        let graph = TaskDag::from_set(set);
        let mut order = Vec::with_capacity(set.tasks().len());
        let mut entries = HashMap::new();

        for task in set.tasks() {
            order.push(task.id.clone());
            entries.insert(
                task.id.clone(),
                SchedEntry {
                    deps: task.depends_on.clone(),
                    mutexes: task.mutex.clone(),
                    state: if task.completed {
                        TaskState::Done
                    } else {
                        TaskState::Pending
                    },
                },
            );
        }

        Self {
            graph,
            order,
            entries,
            mutexes: MutexRegistry::new(),
        }
    }

    pub fn state_of(&self, id: &str) -> Option<TaskState> {
        self.entries.get(id).map(|e| e.state)
    }

    /// Pending tasks whose every dependency is `Done` and whose every
    /// mutex is free, in document order.
    ///
    /// Mutex availability is evaluated against the registry only; two
    /// ready tasks may contend for the same name, and the second
    /// `start()` will be refused, so callers start tasks one at a time.
    pub fn ready(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                let entry = &self.entries[id.as_str()];
                entry.state == TaskState::Pending
                    && self.deps_done(entry)
                    && self.mutexes.available(&entry.mutexes)
            })
            .cloned()
            .collect()
    }

    fn deps_done(&self, entry: &SchedEntry) -> bool {
        entry.deps.iter().all(|dep| {
            self.entries
                .get(dep)
                .map(|d| d.state == TaskState::Done)
                .unwrap_or(false)
        })
    }

    /// Transition `Pending → Running`, acquiring the task's mutexes
    /// atomically. Returns false (and changes nothing) if the task is not
    /// pending, a dependency is unmet, or a mutex is held.
    pub fn start(&mut self, id: &str) -> bool {
        let Some(entry) = self.entries.get(id) else {
            warn!(task = %id, "start for unknown task; ignoring");
            return false;
        };
        if entry.state != TaskState::Pending || !self.deps_done(entry) {
            warn!(task = %id, state = entry.state.as_str(), "start refused");
            return false;
        }
        let mutexes = entry.mutexes.clone();
        if !self.mutexes.acquire(id, &mutexes) {
            debug!(task = %id, "start refused; mutex contention");
            return false;
        }
        self.entries.get_mut(id).unwrap().state = TaskState::Running;
        debug!(task = %id, "task running");
        true
    }

    /// Transition `Running → Done`, releasing mutexes.
    pub fn complete(&mut self, id: &str) {
        self.finish(id, TaskState::Done);
    }

    /// Transition `Running → Failed`, releasing mutexes.
    ///
    /// Cancelled tasks come through here too, so their mutexes are always
    /// released before any deadlock evaluation.
    pub fn fail(&mut self, id: &str) {
        self.finish(id, TaskState::Failed);
    }

    fn finish(&mut self, id: &str, terminal: TaskState) {
        match self.entries.get_mut(id) {
            Some(entry) if entry.state == TaskState::Running => {
                entry.state = terminal;
                self.mutexes.release(id);
                debug!(task = %id, state = terminal.as_str(), "task finished");
            }
            Some(entry) => {
                warn!(
                    task = %id,
                    state = entry.state.as_str(),
                    "finish for task not in Running; ignoring"
                );
            }
            None => warn!(task = %id, "finish for unknown task; ignoring"),
        }
    }

    /// Explicit retry within the same run: `Failed → Pending`.
    pub fn retry(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.state == TaskState::Failed => {
                entry.state = TaskState::Pending;
                debug!(task = %id, "task reset to pending for retry");
                true
            }
            _ => false,
        }
    }

    pub fn count_running(&self) -> usize {
        self.count(TaskState::Running)
    }

    pub fn count_pending(&self) -> usize {
        self.count(TaskState::Pending)
    }

    pub fn count_failed(&self) -> usize {
        self.count(TaskState::Failed)
    }

    fn count(&self, state: TaskState) -> usize {
        self.entries.values().filter(|e| e.state == state).count()
    }

    /// True iff pending work exists that can never start: nothing is
    /// running, yet the ready set is empty.
    pub fn deadlock(&self) -> bool {
        self.count_pending() > 0 && self.count_running() == 0 && self.ready().is_empty()
    }

    /// Human-readable reason a pending task cannot start: unmet
    /// dependencies with their state, and held mutexes with their holder.
    pub fn explain_block(&self, id: &str) -> String {
        let Some(entry) = self.entries.get(id) else {
            return format!("{id}: unknown task");
        };

        let mut reasons = Vec::new();
        for dep in &entry.deps {
            match self.entries.get(dep) {
                Some(d) if d.state != TaskState::Done => {
                    reasons.push(format!("dependency {dep} is {}", d.state.as_str()));
                }
                Some(_) => {}
                None => reasons.push(format!("dependency {dep} is unknown")),
            }
        }
        for name in &entry.mutexes {
            if let Some(holder) = self.mutexes.holder(name)
                && holder != id
            {
                reasons.push(format!("mutex {name} held by {holder}"));
            }
        }

        let dependents = self.graph.dependents_of(id);
        let suffix = if dependents.is_empty() {
            String::new()
        } else {
            format!(" (blocks: {})", dependents.join(", "))
        };

        if reasons.is_empty() {
            format!("{id}: not blocked{suffix}")
        } else {
            format!("{id}: {}{suffix}", reasons.join("; "))
        }
    }

    /// Ids of tasks still pending, in document order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.entries[id.as_str()].state == TaskState::Pending)
            .cloned()
            .collect()
    }

    /// Ids of tasks currently running, in document order.
    pub fn running_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.entries[id.as_str()].state == TaskState::Running)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::model::{RawTaskSet, Task};

    fn task(id: &str, deps: &[&str], mutexes: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: format!("title {id}"),
            completed: false,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            mutex: mutexes.iter().map(|s| s.to_string()).collect(),
            touches: Vec::new(),
            merge_notes: None,
        }
    }

    fn set(tasks: Vec<Task>) -> TaskSet {
        TaskSet::try_from(RawTaskSet {
            version: Some(1),
            branch_name: "integration".to_string(),
            tasks,
        })
        .unwrap()
    }

    #[test]
    fn ready_honours_dependencies_in_document_order() {
        let s = Scheduler::init(&set(vec![
            task("A", &[], &[]),
            task("B", &["A"], &[]),
            task("C", &[], &[]),
        ]));
        assert_eq!(s.ready(), vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn chain_progresses_one_task_at_a_time() {
        let mut s = Scheduler::init(&set(vec![
            task("A", &[], &[]),
            task("B", &["A"], &[]),
            task("C", &["B"], &[]),
        ]));

        assert!(s.start("A"));
        assert!(s.ready().is_empty());
        s.complete("A");
        assert_eq!(s.ready(), vec!["B".to_string()]);
        assert!(s.start("B"));
        s.complete("B");
        assert!(s.start("C"));
        s.complete("C");
        assert_eq!(s.count_pending(), 0);
        assert_eq!(s.count_running(), 0);
    }

    #[test]
    fn mutex_contention_keeps_one_of_two_tasks_out_of_ready() {
        let mut s = Scheduler::init(&set(vec![
            task("X", &[], &["db-migrations"]),
            task("Y", &[], &["db-migrations"]),
        ]));

        assert_eq!(s.ready(), vec!["X".to_string(), "Y".to_string()]);
        assert!(s.start("X"));
        assert!(s.ready().is_empty());
        assert!(!s.start("Y"));

        s.complete("X");
        assert_eq!(s.ready(), vec!["Y".to_string()]);
        assert!(s.start("Y"));
        s.complete("Y");
    }

    #[test]
    fn completed_tasks_start_done_and_never_run() {
        let mut t = task("A", &[], &[]);
        t.completed = true;
        let s = Scheduler::init(&set(vec![t, task("B", &["A"], &[])]));
        assert_eq!(s.state_of("A"), Some(TaskState::Done));
        assert_eq!(s.ready(), vec!["B".to_string()]);
    }

    #[test]
    fn failed_dependency_produces_deadlock_not_ready() {
        let mut s = Scheduler::init(&set(vec![task("A", &[], &[]), task("B", &["A"], &[])]));
        assert!(s.start("A"));
        s.fail("A");
        assert!(s.ready().is_empty());
        assert!(s.deadlock());
        let why = s.explain_block("B");
        assert!(why.contains("dependency A is failed"), "{why}");
    }

    #[test]
    fn fail_releases_mutexes_before_deadlock_is_evaluated() {
        let mut s = Scheduler::init(&set(vec![
            task("X", &[], &["router"]),
            task("Y", &[], &["router"]),
        ]));
        assert!(s.start("X"));
        s.fail("X");
        // Y can still run; the cancelled/failed holder must not wedge it.
        assert!(!s.deadlock());
        assert_eq!(s.ready(), vec!["Y".to_string()]);
    }

    #[test]
    fn retry_is_the_only_way_out_of_failed() {
        let mut s = Scheduler::init(&set(vec![task("A", &[], &[])]));
        assert!(s.start("A"));
        s.fail("A");
        assert!(!s.start("A"));
        assert!(s.retry("A"));
        assert!(s.start("A"));
        s.complete("A");
        assert!(!s.retry("A"));
    }

    #[test]
    fn explain_block_names_mutex_holder() {
        let mut s = Scheduler::init(&set(vec![
            task("X", &[], &["lockfile"]),
            task("Y", &[], &["lockfile"]),
        ]));
        assert!(s.start("X"));
        let why = s.explain_block("Y");
        assert!(why.contains("mutex lockfile held by X"), "{why}");
    }
}
