// src/dag/mutex.rs

//! Named exclusive resources.
//!
//! The registry is owned by the scheduler; holds exist only while the
//! holding task is `Running` and are released exactly once when it leaves
//! that state. Unknown names are rejected at validation time, never here.

use std::collections::HashMap;

use tracing::{debug, warn};

/// Mapping from mutex name to the task id currently holding it.
///
/// Invariant: at most one holder per name.
#[derive(Debug, Default)]
pub struct MutexRegistry {
    holds: HashMap<String, String>,
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every name in `names` is currently free.
    pub fn available(&self, names: &[String]) -> bool {
        names.iter().all(|n| !self.holds.contains_key(n))
    }

    /// Acquire all of a task's mutexes atomically. There is no partial
    /// acquisition: the caller must have checked [`Self::available`] first,
    /// and a conflicting acquire is refused wholesale.
    pub fn acquire(&mut self, task: &str, names: &[String]) -> bool {
        if !self.available(names) {
            warn!(task = %task, ?names, "refusing partial mutex acquisition");
            return false;
        }
        for name in names {
            self.holds.insert(name.clone(), task.to_string());
        }
        if !names.is_empty() {
            debug!(task = %task, ?names, "acquired mutexes");
        }
        true
    }

    /// Release every mutex held by `task`.
    pub fn release(&mut self, task: &str) {
        let before = self.holds.len();
        self.holds.retain(|_, holder| holder != task);
        if self.holds.len() != before {
            debug!(task = %task, "released mutexes");
        }
    }

    /// Current holder of `name`, if any.
    pub fn holder(&self, name: &str) -> Option<&str> {
        self.holds.get(name).map(|s| s.as_str())
    }
}
