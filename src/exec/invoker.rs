// src/exec/invoker.rs

//! Engine process invocation.
//!
//! The invoker is stateless: given an engine, a prompt, and a working
//! directory it spawns the engine process, tees its output stream to the
//! per-task log file and to the engine's stream parser, and reports the
//! raw outcome. It never interprets success or failure — that is the
//! supervisor's job.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use std::process::Stdio;
use tracing::{debug, info, warn};

use crate::cli::EngineKind;
use crate::errors::Result;
use crate::exec::stream::{EngineParser, Stage, StreamObservation};

/// Grace period between the termination signal and a forced kill.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub engine: EngineKind,
    pub prompt: String,
    /// Working directory for the process (a worktree, or the integration
    /// checkout for conflict resolution).
    pub workdir: PathBuf,
    /// Raw stream destination.
    pub log_path: PathBuf,
    /// Engine-specific knob granting unrestricted permissions.
    pub unrestricted: bool,
    /// No output for this long cancels the process.
    pub stalled_timeout: Duration,
}

/// What actually happened to the process, uninterpreted.
#[derive(Debug)]
pub struct InvocationOutcome {
    /// Exit code; `None` when killed by signal.
    pub exit_code: Option<i32>,
    /// The inactivity watchdog fired.
    pub stalled: bool,
    /// The cancel channel fired.
    pub cancelled: bool,
    /// Everything the engine parser extracted from the stream.
    pub observation: StreamObservation,
}

impl InvocationOutcome {
    /// Process exit was clean and no error record appeared in the stream.
    pub fn process_succeeded(&self) -> bool {
        self.exit_code == Some(0)
            && !self.stalled
            && !self.cancelled
            && !self.observation.saw_error_record()
    }
}

fn build_command(inv: &AgentInvocation) -> Command {
    let mut cmd = match inv.engine {
        EngineKind::Claude => {
            let mut c = Command::new("claude");
            c.arg("-p")
                .arg(&inv.prompt)
                .arg("--output-format")
                .arg("stream-json")
                .arg("--verbose");
            if inv.unrestricted {
                c.arg("--dangerously-skip-permissions");
            }
            c
        }
        EngineKind::Codex => {
            let mut c = Command::new("codex");
            c.arg("exec").arg("--json");
            if inv.unrestricted {
                c.arg("--dangerously-bypass-approvals-and-sandbox");
            }
            c.arg(&inv.prompt);
            c
        }
    };

    cmd.current_dir(&inv.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run one agent process to completion, cancellation, or stall.
///
/// The cancel channel is the only way to stop the process from outside;
/// it flipping to `true` sends the termination signal, waits
/// [`TERM_GRACE`], then kills. A `watch` channel is used (rather than a
/// oneshot) so the same cancellation source covers every retry attempt
/// of a supervisor.
pub async fn invoke_agent(
    inv: AgentInvocation,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<InvocationOutcome> {
    if *cancel_rx.borrow() {
        return Ok(InvocationOutcome {
            exit_code: None,
            stalled: false,
            cancelled: true,
            observation: StreamObservation::default(),
        });
    }
    let mut cmd = build_command(&inv);
    debug!(
        engine = ?inv.engine,
        workdir = %inv.workdir.display(),
        "spawning agent process"
    );

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {} process", inv.engine.binary()))?;

    let log = Arc::new(Mutex::new(
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inv.log_path)
            .with_context(|| format!("opening log file {}", inv.log_path.display()))?,
    ));

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Drain stderr in the background; it is logged and teed but carries
    // no structured records.
    if let Some(stderr) = stderr {
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("agent stderr: {line}");
                append_line(&log, &line);
            }
        });
    }

    let mut parser = EngineParser::new(inv.engine);
    let mut stalled = false;
    let mut cancelled = false;
    let mut stage = Stage::Working;
    // Once the cancel sender is gone nothing can cancel us; stop
    // selecting on the channel so a closed sender cannot spin the loop.
    let mut cancel_open = true;

    if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let next = tokio::time::timeout(inv.stalled_timeout, lines.next_line());
            tokio::select! {
                res = next => match res {
                    Ok(Ok(Some(line))) => {
                        append_line(&log, &line);
                        parser.feed_line(&line);
                        let new_stage = parser.observation().stage;
                        if new_stage != stage {
                            stage = new_stage;
                            info!(stage = stage.as_str(), "agent stage");
                        }
                    }
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        warn!(error = %e, "error reading agent stream");
                        break;
                    }
                    Err(_) => {
                        warn!(
                            timeout_secs = inv.stalled_timeout.as_secs(),
                            "no agent output within the inactivity timeout; cancelling"
                        );
                        stalled = true;
                        terminate(&mut child).await;
                        break;
                    }
                },
                res = cancel_rx.changed(), if cancel_open => {
                    match res {
                        Ok(()) if *cancel_rx.borrow() => {
                            info!("cancellation requested; terminating agent process");
                            cancelled = true;
                            terminate(&mut child).await;
                            break;
                        }
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
            }
        }
    }

    // The stream has ended one way or another; reap the process. Bounded
    // so a child that closed stdout but refuses to exit counts as a stall.
    let status = match tokio::time::timeout(inv.stalled_timeout, child.wait()).await {
        Ok(res) => Some(res.context("waiting for agent process")?),
        Err(_) => {
            warn!("agent closed its stream but did not exit; killing");
            stalled = true;
            terminate(&mut child).await;
            None
        }
    };

    Ok(InvocationOutcome {
        exit_code: status.and_then(|s| s.code()),
        stalled,
        cancelled,
        observation: parser.into_observation(),
    })
}

fn append_line(log: &Mutex<File>, line: &str) {
    if let Ok(mut file) = log.lock() {
        let _ = writeln!(file, "{line}");
    }
}

/// Signal-based termination: SIGTERM, bounded grace, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
                return;
            }
            warn!("agent ignored SIGTERM; killing");
        }
    }

    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill agent process");
    }
}
