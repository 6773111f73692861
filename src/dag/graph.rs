// src/dag/graph.rs

use std::collections::HashMap;

use crate::tasks::TaskSet;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: tasks that must be done before this one runs.
    deps: Vec<String>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<String>,
}

/// Simple in-memory DAG representation keyed by task id.
///
/// Acyclicity is already guaranteed by the validation gate, so this only
/// keeps adjacency information for scheduling and diagnostics.
#[derive(Debug, Clone)]
pub struct TaskDag {
    nodes: HashMap<String, DagNode>,
}

impl TaskDag {
    /// Build a DAG from a validated [`TaskSet`].
    pub fn from_set(set: &TaskSet) -> Self {
        let mut nodes: HashMap<String, DagNode> = HashMap::new();

        for task in set.tasks() {
            nodes.insert(
                task.id.clone(),
                DagNode {
                    deps: task.depends_on.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        let ids: Vec<String> = nodes.keys().cloned().collect();
        for id in ids {
            let deps = nodes.get(&id).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(id.clone());
                }
            }
        }

        Self { nodes }
    }

    /// Immediate dependencies of a task (its `dependsOn` list).
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.nodes.get(id).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks listing this one in `dependsOn`).
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
