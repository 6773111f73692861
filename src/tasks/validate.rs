// src/tasks/validate.rs

use std::collections::{HashMap, HashSet};

use petgraph::graphmap::DiGraphMap;

use crate::errors::AgentDagError;
use crate::tasks::model::{
    MUTEX_CATALOG, MUTEX_CONTRACT_PREFIX, RawTaskSet, TASKSET_VERSION, TaskSet,
};

impl TryFrom<RawTaskSet> for TaskSet {
    type Error = AgentDagError;

    fn try_from(raw: RawTaskSet) -> std::result::Result<Self, Self::Error> {
        let errors = validate_raw(&raw);
        if !errors.is_empty() {
            return Err(AgentDagError::Validation(errors));
        }
        Ok(TaskSet::new_unchecked(raw.branch_name, raw.tasks))
    }
}

/// The single validation gate. Returns *all* problems, not just the first,
/// so a bad document can be fixed in one pass.
fn validate_raw(raw: &RawTaskSet) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(v) = raw.version
        && v != TASKSET_VERSION
    {
        errors.push(format!("unsupported version {v} (expected {TASKSET_VERSION})"));
    }

    if let Err(msg) = check_branch_name(&raw.branch_name) {
        errors.push(msg);
    }

    if raw.tasks.is_empty() {
        errors.push("document must contain at least one [[tasks]] entry".to_string());
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for task in &raw.tasks {
        if task.id.trim().is_empty() {
            errors.push("task with empty id".to_string());
        }
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
    }

    for task in &raw.tasks {
        for dep in &task.depends_on {
            if !seen.contains(dep.as_str()) {
                errors.push(format!(
                    "task '{}' has unknown dependency '{}' in dependsOn",
                    task.id, dep
                ));
            }
            if dep == &task.id {
                errors.push(format!("task '{}' cannot depend on itself", task.id));
            }
        }

        for name in &task.mutex {
            if !MUTEX_CATALOG.contains(&name.as_str())
                && !name.starts_with(MUTEX_CONTRACT_PREFIX)
            {
                errors.push(format!(
                    "task '{}' uses unknown mutex '{}' (catalog: {}; or '{}<suffix>')",
                    task.id,
                    name,
                    MUTEX_CATALOG.join(", "),
                    MUTEX_CONTRACT_PREFIX
                ));
            }
        }
    }

    // Cycle detection only makes sense on a graph whose references resolve.
    if errors.is_empty()
        && let Some(cycle) = find_cycle(raw)
    {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    errors
}

/// Offline approximation of `git check-ref-format --branch`.
fn check_branch_name(name: &str) -> std::result::Result<(), String> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with('.')
        || name.contains("..")
        || name.contains("//")
        || name.contains("@{")
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\'));
    if bad {
        Err(format!("invalid branchName '{name}'"))
    } else {
        Ok(())
    }
}

/// Iterative depth-first search for a cycle; returns one explicit cycle
/// path (first and last element equal) if any exists.
///
/// Edge direction: dependency -> dependent, matching the scheduling order.
fn find_cycle(raw: &RawTaskSet) -> Option<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for task in &raw.tasks {
        graph.add_node(task.id.as_str());
    }
    for task in &raw.tasks {
        for dep in &task.depends_on {
            graph.add_edge(dep.as_str(), task.id.as_str(), ());
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for start in graph.nodes() {
        if marks.contains_key(start) {
            continue;
        }

        // Stack frames: (node, neighbor iterator position). `path` mirrors
        // the stack so a back edge can be reported as an explicit path.
        let mut stack: Vec<(&str, Vec<&str>)> = vec![(
            start,
            graph.neighbors(start).collect(),
        )];
        let mut path: Vec<&str> = vec![start];
        marks.insert(start, Mark::InProgress);

        while let Some((_, neighbors)) = stack.last_mut() {
            match neighbors.pop() {
                Some(next) => match marks.get(next) {
                    Some(Mark::InProgress) => {
                        let from = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[from..].iter().map(|s| s.to_string()).collect();
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::InProgress);
                        path.push(next);
                        stack.push((next, graph.neighbors(next).collect()));
                    }
                },
                None => {
                    let (node, _) = stack.pop().unwrap();
                    path.pop();
                    marks.insert(node, Mark::Done);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::model::Task;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: format!("title for {id}"),
            completed: false,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            mutex: Vec::new(),
            touches: Vec::new(),
            merge_notes: None,
        }
    }

    fn raw(tasks: Vec<Task>) -> RawTaskSet {
        RawTaskSet {
            version: None,
            branch_name: "feature/run".to_string(),
            tasks,
        }
    }

    #[test]
    fn accepts_a_valid_document() {
        let r = raw(vec![task("A", &[]), task("B", &["A"])]);
        assert!(TaskSet::try_from(r).is_ok());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let r = raw(vec![task("A", &[]), task("A", &[])]);
        let err = TaskSet::try_from(r).unwrap_err();
        assert!(err.to_string().contains("duplicate task id 'A'"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let r = raw(vec![task("A", &["missing"])]);
        let err = TaskSet::try_from(r).unwrap_err();
        assert!(err.to_string().contains("unknown dependency 'missing'"));
    }

    #[test]
    fn reports_a_two_cycle_with_path() {
        let r = raw(vec![task("P", &["Q"]), task("Q", &["P"])]);
        let err = TaskSet::try_from(r).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dependency cycle:"), "{msg}");
        assert!(msg.contains("P") && msg.contains("Q"), "{msg}");
    }

    #[test]
    fn reports_a_three_cycle() {
        let r = raw(vec![task("A", &["C"]), task("B", &["A"]), task("C", &["B"])]);
        let err = TaskSet::try_from(r).unwrap_err();
        assert!(err.to_string().contains("dependency cycle:"));
    }

    #[test]
    fn mutex_names_follow_the_catalog_and_contract_prefix() {
        let mut ok = task("A", &[]);
        ok.mutex = vec!["db-migrations".to_string(), "contract:payments".to_string()];
        assert!(TaskSet::try_from(raw(vec![ok])).is_ok());

        let mut bad = task("B", &[]);
        bad.mutex = vec!["weird".to_string()];
        let err = TaskSet::try_from(raw(vec![bad])).unwrap_err();
        assert!(err.to_string().contains("unknown mutex 'weird'"));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut r = raw(vec![task("A", &[])]);
        r.version = Some(2);
        let err = TaskSet::try_from(r).unwrap_err();
        assert!(err.to_string().contains("unsupported version 2"));
    }

    #[test]
    fn version_one_is_accepted() {
        let mut r = raw(vec![task("A", &[])]);
        r.version = Some(1);
        assert!(TaskSet::try_from(r).is_ok());
    }

    #[test]
    fn collects_multiple_errors_in_one_pass() {
        let mut t1 = task("A", &["missing"]);
        t1.mutex = vec!["weird".to_string()];
        let r = raw(vec![t1, task("A", &[])]);
        match TaskSet::try_from(r).unwrap_err() {
            AgentDagError::Validation(errors) => assert!(errors.len() >= 3, "{errors:?}"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_branch_names() {
        for name in ["", "a b", "x..y", "end/", "/lead", "ref~1"] {
            let mut r = raw(vec![task("A", &[])]);
            r.branch_name = name.to_string();
            assert!(TaskSet::try_from(r).is_err(), "branch {name:?} should be rejected");
        }
    }
}
