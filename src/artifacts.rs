// src/artifacts.rs

//! Durable per-run artifacts.
//!
//! Layout under `<run-root>/<prd-id>/`:
//!
//! ```text
//! requirements.md           copy of the input document
//! tasks.toml                the TaskSet (authoritative)
//! progress.txt              accumulated notes (append-only)
//! reports/<task-id>.json
//! reports/<task-id>.log
//! ```
//!
//! Report writes are atomic (temp file + rename) and append-only within a
//! run: resume never truncates reports from earlier runs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::exec::FailureKind;
use crate::tasks::store::write_atomic;

/// Maximum progress-note lines carried into a report.
pub const NOTES_TAIL_LINES: usize = 50;

/// Per-task record persisted on completion or failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub id: String,
    pub title: String,
    pub branch: String,
    /// `success`, `failed`, or `cancelled`.
    pub status: String,
    /// Commits on the task branch relative to the base branch.
    pub commit_count: u64,
    /// Comma-joined changed-file list.
    pub changed_files: String,
    /// Tail of the progress notes, at most [`NOTES_TAIL_LINES`] lines.
    pub notes_tail: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureKind>,
    /// Last non-debug line of the agent stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque usage record as reported by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    /// RFC 3339.
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    run_dir: PathBuf,
    reports_dir: PathBuf,
}

impl ArtifactWriter {
    /// Open (and on first use, initialize) the run directory.
    ///
    /// The requirements document is copied on first initialization only;
    /// later runs keep the original copy.
    pub fn init(run_dir: &Path, requirements_src: Option<&Path>) -> Result<Self> {
        let reports_dir = run_dir.join("reports");
        std::fs::create_dir_all(&reports_dir)?;

        let requirements_dst = run_dir.join("requirements.md");
        if let Some(src) = requirements_src
            && !requirements_dst.exists()
        {
            std::fs::copy(src, &requirements_dst)?;
        }

        let progress = run_dir.join("progress.txt");
        if !progress.exists() {
            std::fs::write(&progress, "")?;
        }

        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            reports_dir,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn report_path(&self, task_id: &str) -> PathBuf {
        self.reports_dir.join(format!("{task_id}.json"))
    }

    pub fn log_path(&self, task_id: &str) -> PathBuf {
        self.reports_dir.join(format!("{task_id}.log"))
    }

    pub fn write_report(&self, report: &TaskReport) -> Result<()> {
        let path = self.report_path(&report.id);
        let rendered = serde_json::to_string_pretty(report)?;
        write_atomic(&path, rendered.as_bytes())?;
        debug!(task = %report.id, path = %path.display(), "wrote task report");
        Ok(())
    }

    /// Append lines to the run-wide progress notes.
    pub fn append_progress(&self, task_id: &str, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir.join("progress.txt"))?;
        writeln!(file, "[{task_id}]")?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

/// Tail of a notes file, at most [`NOTES_TAIL_LINES`] lines. Missing
/// files read as empty.
pub fn notes_tail(path: &Path) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(NOTES_TAIL_LINES);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> TaskReport {
        TaskReport {
            id: "TASK-001".to_string(),
            title: "first".to_string(),
            branch: "agentdag/agent-1-first".to_string(),
            status: "success".to_string(),
            commit_count: 2,
            changed_files: "src/a.rs,src/b.rs".to_string(),
            notes_tail: vec!["did the thing".to_string()],
            failure_type: None,
            error: None,
            usage: None,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn report_serializes_with_camel_case_fields() {
        let json = serde_json::to_value(sample_report()).unwrap();
        assert_eq!(json["commitCount"], 2);
        assert_eq!(json["changedFiles"], "src/a.rs,src/b.rs");
        assert!(json.get("failureType").is_none());
    }

    #[test]
    fn init_is_idempotent_and_preserves_prior_reports() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::init(dir.path(), None).unwrap();
        writer.write_report(&sample_report()).unwrap();

        // Re-initialize, as a resumed run would.
        let writer2 = ArtifactWriter::init(dir.path(), None).unwrap();
        assert!(writer2.report_path("TASK-001").exists());
    }

    #[test]
    fn notes_tail_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.txt");
        let many: Vec<String> = (0..120).map(|i| format!("line {i}")).collect();
        std::fs::write(&path, many.join("\n")).unwrap();

        let tail = notes_tail(&path);
        assert_eq!(tail.len(), NOTES_TAIL_LINES);
        assert_eq!(tail.last().unwrap(), "line 119");
    }
}
