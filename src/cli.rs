// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `agentdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "agentdag",
    version,
    about = "Run a DAG of coding-agent tasks in parallel git worktrees and merge the results.",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `AGENTDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Start a new run from a requirements document.
    Run {
        /// Path to the requirements document (must carry a `prd-id:` line).
        requirements: String,

        #[command(flatten)]
        tuning: TuningArgs,

        /// Parse + validate, print the task plan, but don't execute anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Resume a previous run by its prd-id; completed tasks are skipped.
    Resume {
        /// The prd-id naming the run directory.
        prd_id: String,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Show per-task completion and report status for a run directory.
    Status {
        /// The prd-id naming the run directory.
        prd_id: String,

        /// Root directory holding run directories.
        #[arg(long, value_name = "DIR", default_value = ".agentdag")]
        run_root: String,
    },

    /// Install the agent-facing skill prompt bundle into this repository.
    InitSkills {
        /// Overwrite an existing (possibly locally modified) bundle.
        #[arg(long)]
        force: bool,
    },

    /// Reinstall the released binary via the package manager.
    Update,
}

/// Tuning knobs shared by `run` and `resume`.
#[derive(Debug, Clone, Args)]
pub struct TuningArgs {
    /// Coding-agent engine to invoke.
    #[arg(long, value_enum, default_value = "claude")]
    pub engine: EngineKind,

    /// Maximum number of tasks supervised concurrently (1 = sequential).
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub parallel: usize,

    /// Agent invocation retries per task before the task is failed.
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub max_retries: u32,

    /// Seconds without agent output before the task is cancelled.
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub stalled_timeout: u64,

    /// Seconds to await running tasks after an external failure.
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub external_fail_timeout: u64,

    /// Scheduling iteration cap (0 = unbounded).
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub max_iterations: u64,

    /// Prefix for agent branch names.
    #[arg(long, value_name = "PREFIX", default_value = "agentdag")]
    pub branch_prefix: String,

    /// Root directory holding run directories.
    #[arg(long, value_name = "DIR", default_value = ".agentdag")]
    pub run_root: String,

    /// Grant the agent unrestricted permissions (engine-specific knob).
    #[arg(long)]
    pub unrestricted: bool,
}

/// Supported coding-agent engines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    Claude,
    Codex,
}

impl EngineKind {
    /// Name of the engine binary on PATH.
    pub fn binary(self) -> &'static str {
        match self {
            EngineKind::Claude => "claude",
            EngineKind::Codex => "codex",
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
