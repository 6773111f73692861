// src/exec/stream.rs

//! Per-engine output-stream parsers.
//!
//! Each engine emits a line-oriented stream from which a `result` record,
//! a `usage` record, and optional `error` records can be extracted. The
//! parsers are small finite-state transducers, not generic JSON
//! consumers: engines interleave structured records with free text, so a
//! line that fails to decode is kept as free text rather than treated as
//! an error.
//!
//! The parsers also derive a coarse stage label from tool names observed
//! in the stream; the supervisor exposes it as the task's status.

use serde_json::Value;

use crate::cli::EngineKind;

/// Coarse stage of an agent run, derived from observed tool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Working,
    Reading,
    Implementing,
    Testing,
    Linting,
    Committing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Working => "working",
            Stage::Reading => "reading",
            Stage::Implementing => "implementing",
            Stage::Testing => "testing",
            Stage::Linting => "linting",
            Stage::Committing => "committing",
        }
    }
}

/// Everything extracted from one agent stream.
#[derive(Debug, Default, Clone)]
pub struct StreamObservation {
    /// A well-formed result record was seen and reported success.
    pub result_success: Option<bool>,
    /// Final result text, when the engine provides one.
    pub result_text: Option<String>,
    /// Opaque usage record passed through to the report.
    pub usage: Option<Value>,
    /// Messages from well-formed error records.
    pub errors: Vec<String>,
    /// Current coarse stage label.
    pub stage: Stage,
    /// Last line that was not a debug-level record; classification input.
    pub last_meaningful_line: Option<String>,
}

impl StreamObservation {
    pub fn saw_error_record(&self) -> bool {
        !self.errors.is_empty() || self.result_success == Some(false)
    }

    /// The line classification runs on: the last error record if any,
    /// else the last non-debug line.
    pub fn classification_line(&self) -> Option<&str> {
        self.errors
            .last()
            .map(|s| s.as_str())
            .or(self.last_meaningful_line.as_deref())
    }
}

/// One parser variant per supported engine.
#[derive(Debug)]
pub enum EngineParser {
    Claude(ClaudeParser),
    Codex(CodexParser),
}

impl EngineParser {
    pub fn new(engine: EngineKind) -> Self {
        match engine {
            EngineKind::Claude => EngineParser::Claude(ClaudeParser::default()),
            EngineKind::Codex => EngineParser::Codex(CodexParser::default()),
        }
    }

    /// Feed one stream line.
    pub fn feed_line(&mut self, line: &str) {
        match self {
            EngineParser::Claude(p) => p.feed_line(line),
            EngineParser::Codex(p) => p.feed_line(line),
        }
    }

    pub fn observation(&self) -> &StreamObservation {
        match self {
            EngineParser::Claude(p) => &p.obs,
            EngineParser::Codex(p) => &p.obs,
        }
    }

    pub fn into_observation(self) -> StreamObservation {
        match self {
            EngineParser::Claude(p) => p.obs,
            EngineParser::Codex(p) => p.obs,
        }
    }
}

fn stage_for_tool(name: &str, input: Option<&Value>) -> Option<Stage> {
    match name {
        "Read" | "Grep" | "Glob" | "LS" | "NotebookRead" => Some(Stage::Reading),
        "Edit" | "Write" | "MultiEdit" | "NotebookEdit" | "apply_patch" => {
            Some(Stage::Implementing)
        }
        "Bash" | "shell" | "local_shell" => {
            let cmd = input
                .and_then(|v| v.get("command"))
                .and_then(Value::as_str)
                .unwrap_or("");
            stage_for_command(cmd)
        }
        _ => None,
    }
}

fn stage_for_command(cmd: &str) -> Option<Stage> {
    if cmd.contains("git commit") {
        Some(Stage::Committing)
    } else if cmd.contains("clippy") || cmd.contains("lint") || cmd.contains("fmt --check") {
        Some(Stage::Linting)
    } else if cmd.contains("test") || cmd.contains("pytest") {
        Some(Stage::Testing)
    } else {
        None
    }
}

/// Parser for `claude --output-format stream-json`.
///
/// Records are one JSON object per line with a `type` discriminator:
/// `system`, `assistant`, `user`, and a final `result`. Tool usage shows
/// up as `tool_use` content blocks inside `assistant` records. Free text
/// between records is tolerated and only remembered as the last
/// meaningful line.
#[derive(Debug, Default)]
pub struct ClaudeParser {
    obs: StreamObservation,
}

impl ClaudeParser {
    fn feed_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            self.obs.last_meaningful_line = Some(trimmed.to_string());
            return;
        };

        match value.get("type").and_then(Value::as_str) {
            Some("result") => {
                let is_error = value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                    || value
                        .get("subtype")
                        .and_then(Value::as_str)
                        .is_some_and(|s| s != "success");
                self.obs.result_success = Some(!is_error);
                if let Some(text) = value.get("result").and_then(Value::as_str) {
                    self.obs.last_meaningful_line =
                        text.lines().last().map(|l| l.to_string());
                    self.obs.result_text = Some(text.to_string());
                    if is_error {
                        self.obs.errors.push(text.to_string());
                    }
                }
                if let Some(usage) = value.get("usage") {
                    self.obs.usage = Some(usage.clone());
                }
            }
            Some("assistant") => {
                let blocks = value
                    .pointer("/message/content")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("tool_use") => {
                            if let Some(name) = block.get("name").and_then(Value::as_str)
                                && let Some(stage) = stage_for_tool(name, block.get("input"))
                            {
                                self.obs.stage = stage;
                            }
                        }
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str)
                                && let Some(last) =
                                    text.lines().rev().find(|l| !l.trim().is_empty())
                            {
                                self.obs.last_meaningful_line = Some(last.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            Some("system") => {
                // Init/debug records; not classification input.
                if value.get("subtype").and_then(Value::as_str) == Some("error")
                    && let Some(msg) = value.get("message").and_then(Value::as_str)
                {
                    self.obs.errors.push(msg.to_string());
                    self.obs.last_meaningful_line = Some(msg.to_string());
                }
            }
            _ => {}
        }
    }
}

/// Parser for `codex exec --json`.
///
/// Records carry `type` values such as `item.completed` (with a nested
/// `item` of type `agent_message` or `command_execution`),
/// `turn.completed` (with `usage`), and `error`.
#[derive(Debug, Default)]
pub struct CodexParser {
    obs: StreamObservation,
}

impl CodexParser {
    fn feed_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            self.obs.last_meaningful_line = Some(trimmed.to_string());
            return;
        };

        match value.get("type").and_then(Value::as_str) {
            Some("item.completed") => {
                let item = value.get("item").cloned().unwrap_or(Value::Null);
                match item.get("type").and_then(Value::as_str) {
                    Some("agent_message") => {
                        if let Some(text) = item.get("text").and_then(Value::as_str) {
                            self.obs.result_text = Some(text.to_string());
                            if let Some(last) =
                                text.lines().rev().find(|l| !l.trim().is_empty())
                            {
                                self.obs.last_meaningful_line = Some(last.to_string());
                            }
                        }
                    }
                    Some("command_execution") => {
                        let cmd = item
                            .get("command")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if let Some(stage) = stage_for_command(cmd) {
                            self.obs.stage = stage;
                        } else {
                            self.obs.stage = Stage::Implementing;
                        }
                    }
                    Some("file_change") => self.obs.stage = Stage::Implementing,
                    _ => {}
                }
            }
            Some("turn.completed") => {
                if let Some(usage) = value.get("usage") {
                    self.obs.usage = Some(usage.clone());
                }
                if self.obs.result_success.is_none() {
                    self.obs.result_success = Some(true);
                }
            }
            Some("turn.failed") => {
                self.obs.result_success = Some(false);
            }
            Some("error") => {
                let msg = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown engine error")
                    .to_string();
                self.obs.last_meaningful_line = Some(msg.clone());
                self.obs.errors.push(msg);
                self.obs.result_success = Some(false);
            }
            _ => {}
        }
    }
}
