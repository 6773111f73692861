#![allow(dead_code)]

use agentdag::tasks::model::{RawTaskSet, Task, TaskSet};

/// Builder for `TaskSet` to simplify test setup.
pub struct TaskSetBuilder {
    raw: RawTaskSet,
}

impl TaskSetBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawTaskSet {
                version: Some(1),
                branch_name: "integration".to_string(),
                tasks: Vec::new(),
            },
        }
    }

    pub fn branch(mut self, name: &str) -> Self {
        self.raw.branch_name = name.to_string();
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.raw.tasks.push(task);
        self
    }

    pub fn build(self) -> TaskSet {
        TaskSet::try_from(self.raw).expect("Failed to build valid task set from builder")
    }

    /// The raw, unvalidated form for tests that exercise validation.
    pub fn build_raw(self) -> RawTaskSet {
        self.raw
    }
}

impl Default for TaskSetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            task: Task {
                id: id.to_string(),
                title: title.to_string(),
                completed: false,
                depends_on: vec![],
                mutex: vec![],
                touches: vec![],
                merge_notes: None,
            },
        }
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn mutex(mut self, name: &str) -> Self {
        self.task.mutex.push(name.to_string());
        self
    }

    pub fn touches(mut self, path: &str) -> Self {
        self.task.touches.push(path.to_string());
        self
    }

    pub fn merge_notes(mut self, notes: &str) -> Self {
        self.task.merge_notes = Some(notes.to_string());
        self
    }

    pub fn completed(mut self, val: bool) -> Self {
        self.task.completed = val;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
