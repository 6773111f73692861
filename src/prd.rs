// src/prd.rs

//! Requirements-document handling.
//!
//! A requirements document is free-form text with one mandatory header
//! line `prd-id: <id>` directly under the title. The prd-id names the
//! run directory. Translation of the document into a tasks file is a
//! pure function from the runner's point of view: one agent invocation
//! whose output is `tasks.toml` in the run directory, validated by the
//! task store like any other document.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use tracing::info;

use crate::cli::EngineKind;
use crate::errors::{AgentDagError, Result};
use crate::exec::invoker::{AgentInvocation, invoke_agent};
use crate::tasks::model::MUTEX_CATALOG;

/// Extract the mandatory `prd-id:` line.
///
/// The line must sit directly under the title: only the first non-blank
/// line after line 1 is examined. A `prd-id:`-shaped line anywhere later
/// in the body does not count.
pub fn extract_prd_id(contents: &str) -> Result<String> {
    let re = Regex::new(r"^prd-id:\s*(\S+)\s*$").expect("static regex");
    contents
        .lines()
        .skip(1)
        .find(|line| !line.trim().is_empty())
        .and_then(|line| re.captures(line))
        .map(|c| c[1].to_string())
        .ok_or_else(|| {
            AgentDagError::Validation(vec![
                "requirements document has no 'prd-id: <id>' line under the title".to_string(),
            ])
        })
}

/// One-shot agent call that writes `tasks.toml` into the run directory.
pub async fn generate_tasks(
    engine: EngineKind,
    unrestricted: bool,
    stalled_timeout: Duration,
    repo_root: &Path,
    run_dir: &Path,
) -> Result<()> {
    let tasks_path = run_dir.join("tasks.toml");
    let requirements_path = run_dir.join("requirements.md");
    info!(
        requirements = %requirements_path.display(),
        tasks = %tasks_path.display(),
        "translating requirements into tasks"
    );

    let prompt = translation_prompt(&requirements_path, &tasks_path);
    let (_cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);

    let outcome = invoke_agent(
        AgentInvocation {
            engine,
            prompt,
            workdir: repo_root.to_path_buf(),
            log_path: run_dir.join("translate.log"),
            unrestricted,
            stalled_timeout,
        },
        &mut cancel_rx,
    )
    .await?;

    if !outcome.process_succeeded() {
        return Err(AgentDagError::RunFailed(format!(
            "requirements translation failed: {}",
            outcome
                .observation
                .classification_line()
                .unwrap_or("agent reported no result")
        )));
    }
    if !tasks_path.exists() {
        return Err(AgentDagError::RunFailed(
            "requirements translation produced no tasks.toml".to_string(),
        ));
    }
    Ok(())
}

fn translation_prompt(requirements: &Path, tasks: &Path) -> String {
    format!(
        "Read the product requirements document at {req} and translate it \
into a task plan at {tasks} (TOML). Write only that file.\n\n\
Document format:\n\
  version = 1\n\
  branchName = \"<base and integration branch for the run>\"\n\n\
  [[tasks]]\n\
  id = \"TASK-001\"            # unique, stable\n\
  title = \"<imperative summary>\"\n\
  completed = false\n\
  dependsOn = []               # ids of tasks that must merge first\n\
  mutex = []                   # exclusive resources, from: {catalog}; or \"contract:<name>\"\n\
  touches = []                 # advisory file paths\n\
  mergeNotes = \"\"             # optional hint for conflict resolution\n\n\
Rules:\n\
- Tasks must form a DAG (no dependency cycles).\n\
- Prefer small independent tasks; add dependsOn only for real ordering.\n\
- Use a mutex only when two tasks would race on the named resource.\n\
- branchName must be an existing branch in this repository.",
        req = requirements.display(),
        tasks = tasks.display(),
        catalog = MUTEX_CATALOG.join(", "),
    )
}
