// src/tasks/mod.rs

//! The task store: loading, validating, and mutating the task graph.
//!
//! - [`model`] holds the on-disk document model (TOML).
//! - [`validate`] is the single validation gate (raw → validated).
//! - [`store`] owns the authoritative on-disk copy and completion writes.

pub mod model;
pub mod store;
pub mod validate;

pub use model::{MUTEX_CATALOG, MUTEX_CONTRACT_PREFIX, RawTaskSet, Task, TaskSet};
pub use store::TaskStore;
