// src/tasks/model.rs

use serde::{Deserialize, Serialize};

/// Names a task may hold exclusively while running.
pub const MUTEX_CATALOG: &[&str] = &["db-migrations", "lockfile", "router", "global-config"];

/// Open-ended mutex namespace; any suffix is accepted.
pub const MUTEX_CONTRACT_PREFIX: &str = "contract:";

/// Schema version this build understands.
pub const TASKSET_VERSION: u32 = 1;

/// One task as read from / written to `tasks.toml`.
///
/// ```toml
/// [[tasks]]
/// id = "TASK-001"
/// title = "Add login endpoint"
/// completed = false
/// dependsOn = []
/// mutex = ["router"]
/// mergeNotes = "keep both route registrations"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    /// The only field that is mutated after load; persisted by the
    /// integrator once the task's commits are merged.
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub mutex: Vec<String>,
    /// Advisory list of file paths; not enforced anywhere.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub touches: Vec<String>,
    /// Free-text hint consumed only by conflict resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_notes: Option<String>,
}

/// Top-level tasks document as deserialized, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTaskSet {
    /// Optional; defaults to 1 and must equal 1 when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Base and integration branch for the run.
    pub branch_name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A validated tasks document. Construct via `TryFrom<RawTaskSet>`.
///
/// Task order is preserved; the scheduler uses it as its determinism
/// order for the ready set.
#[derive(Debug, Clone)]
pub struct TaskSet {
    branch_name: String,
    tasks: Vec<Task>,
}

impl TaskSet {
    /// Used by the validation gate after all rules passed.
    pub(crate) fn new_unchecked(branch_name: String, tasks: Vec<Task>) -> Self {
        Self { branch_name, tasks }
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.id.as_str())
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Serializable form, e.g. for persisting completion updates.
    pub fn to_raw(&self) -> RawTaskSet {
        RawTaskSet {
            version: Some(TASKSET_VERSION),
            branch_name: self.branch_name.clone(),
            tasks: self.tasks.clone(),
        }
    }
}
