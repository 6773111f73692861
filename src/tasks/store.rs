// src/tasks/store.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::Result;
use crate::tasks::model::{RawTaskSet, Task, TaskSet};

/// The authoritative on-disk tasks document plus its parsed form.
///
/// `completed` is the only field ever mutated after load. Writes go
/// through [`TaskStore::mark_completed`], which serializes the whole
/// document and atomically replaces the file (write-then-rename), so a
/// crash mid-write never leaves a torn document behind. Only the
/// integrator calls it.
#[derive(Debug)]
pub struct TaskStore {
    path: PathBuf,
    set: TaskSet,
}

impl TaskStore {
    /// Load and validate the tasks document at `path`.
    ///
    /// Validation runs unconditionally; a document with any error fails
    /// the run before scheduling starts.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let raw: RawTaskSet = toml::from_str(&contents).map_err(|e| {
            crate::errors::AgentDagError::Validation(vec![format!(
                "tasks file {}: {e}",
                path.display()
            )])
        })?;
        let set = TaskSet::try_from(raw)?;
        Ok(Self {
            path: path.to_path_buf(),
            set,
        })
    }

    /// Create a store from an already-validated set, writing it to `path`.
    pub fn create(path: impl AsRef<Path>, set: TaskSet) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            set,
        };
        store.persist()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&self) -> &TaskSet {
        &self.set
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.set.get(id)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.set.get(id).map(|t| t.completed).unwrap_or(false)
    }

    /// Persist `completed = true` for a task. Idempotent; completion is
    /// monotonic within a run (false → true only).
    pub fn mark_completed(&mut self, id: &str) -> Result<()> {
        match self.set.get_mut(id) {
            Some(task) if task.completed => {
                debug!(task = %id, "task already completed; completion write is a no-op");
                return Ok(());
            }
            Some(task) => task.completed = true,
            None => return Ok(()),
        }
        self.persist()?;
        debug!(task = %id, path = %self.path.display(), "persisted completion");
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let raw = self.set.to_raw();
        let rendered =
            toml::to_string_pretty(&raw).map_err(|e| anyhow::anyhow!("serializing tasks: {e}"))?;
        write_atomic(&self.path, rendered.as_bytes())?;
        Ok(())
    }
}

/// Write-then-rename so concurrent readers always see a full document.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::model::Task;

    fn sample_set() -> TaskSet {
        let raw = RawTaskSet {
            version: Some(1),
            branch_name: "integration".to_string(),
            tasks: vec![
                Task {
                    id: "TASK-001".to_string(),
                    title: "first".to_string(),
                    completed: false,
                    depends_on: vec![],
                    mutex: vec![],
                    touches: vec![],
                    merge_notes: None,
                },
                Task {
                    id: "TASK-002".to_string(),
                    title: "second".to_string(),
                    completed: false,
                    depends_on: vec!["TASK-001".to_string()],
                    mutex: vec!["lockfile".to_string()],
                    touches: vec![],
                    merge_notes: Some("prefer ours for Cargo.lock".to_string()),
                },
            ],
        };
        TaskSet::try_from(raw).unwrap()
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.toml");
        TaskStore::create(&path, sample_set()).unwrap();

        let reloaded = TaskStore::load(&path).unwrap();
        assert_eq!(reloaded.set().branch_name(), "integration");
        assert_eq!(reloaded.set().tasks().len(), 2);
        assert_eq!(
            reloaded.get("TASK-002").unwrap().merge_notes.as_deref(),
            Some("prefer ours for Cargo.lock")
        );
    }

    #[test]
    fn malformed_documents_are_a_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.toml");
        std::fs::write(
            &path,
            "branchName = \"integration\"\n[[tasks]]\nid = \"A\"\ntitle = \"a\"\ncompleted = \"yes\"\n",
        )
        .unwrap();

        let err = TaskStore::load(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2, "malformed tasks file must exit 2");
    }

    #[test]
    fn completion_writes_are_idempotent_and_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.toml");
        let mut store = TaskStore::create(&path, sample_set()).unwrap();

        store.mark_completed("TASK-001").unwrap();
        store.mark_completed("TASK-001").unwrap();

        let reloaded = TaskStore::load(&path).unwrap();
        assert!(reloaded.is_completed("TASK-001"));
        assert!(!reloaded.is_completed("TASK-002"));
    }
}
