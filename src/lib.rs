// src/lib.rs

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod prd;
pub mod skills;
pub mod tasks;
pub mod vcs;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::info;

use crate::artifacts::ArtifactWriter;
use crate::cli::{CliArgs, CliCommand, TuningArgs};
use crate::config::RunContext;
use crate::dag::Scheduler;
use crate::engine::{CoreRuntime, Runtime, RunVerdict, RuntimeEvent};
use crate::errors::{AgentDagError, Result};
use crate::exec::RealSupervisorBackend;
use crate::exec::supervisor::SupervisorDeps;
use crate::tasks::TaskStore;
use crate::vcs::git::GitRepo;
use crate::vcs::integrate::GitIntegrator;
use crate::vcs::worktree::WorktreeManager;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        CliCommand::Run {
            requirements,
            tuning,
            dry_run,
        } => run_from_requirements(&requirements, &tuning, dry_run).await,
        CliCommand::Resume { prd_id, tuning } => resume_run(&prd_id, &tuning).await,
        CliCommand::Status { prd_id, run_root } => show_status(&run_root, &prd_id),
        CliCommand::InitSkills { force } => {
            skills::init_skills(&std::env::current_dir()?, force)
        }
        CliCommand::Update => run_update(),
    }
}

async fn run_from_requirements(
    requirements: &str,
    tuning: &TuningArgs,
    dry_run: bool,
) -> Result<()> {
    let contents = std::fs::read_to_string(requirements).map_err(|e| {
        AgentDagError::Precondition(format!("cannot read requirements '{requirements}': {e}"))
    })?;
    let prd_id = prd::extract_prd_id(&contents)?;
    info!(prd_id = %prd_id, "starting run");

    config::check_engine_binary(tuning.engine)?;
    let run_dir = PathBuf::from(&tuning.run_root).join(&prd_id);
    config::check_run_dir_writable(&run_dir)?;

    let artifacts = ArtifactWriter::init(&run_dir, Some(requirements.as_ref()))?;

    let tasks_path = run_dir.join("tasks.toml");
    if !tasks_path.exists() {
        if dry_run {
            return Err(AgentDagError::Precondition(
                "--dry-run needs an existing tasks file; run without it once to translate the \
requirements"
                    .to_string(),
            ));
        }
        prd::generate_tasks(
            tuning.engine,
            tuning.unrestricted,
            std::time::Duration::from_secs(tuning.stalled_timeout),
            &std::env::current_dir()?,
            &run_dir,
        )
        .await?;
    }

    let store = TaskStore::load(&tasks_path)?;
    let ctx = RunContext::new(
        prd_id,
        store.set().branch_name().to_string(),
        std::env::current_dir()?,
        tuning,
    )?;

    if dry_run {
        print_dry_run(&ctx, &store);
        return Ok(());
    }

    execute_run(ctx, store, artifacts).await
}

async fn resume_run(prd_id: &str, tuning: &TuningArgs) -> Result<()> {
    config::check_engine_binary(tuning.engine)?;

    let run_dir = PathBuf::from(&tuning.run_root).join(prd_id);
    let tasks_path = run_dir.join("tasks.toml");
    if !tasks_path.exists() {
        return Err(AgentDagError::Precondition(format!(
            "no run directory for prd-id '{prd_id}' (expected {})",
            tasks_path.display()
        )));
    }
    info!(prd_id = %prd_id, "resuming run");

    let artifacts = ArtifactWriter::init(&run_dir, None)?;
    let store = TaskStore::load(&tasks_path)?;
    let ctx = RunContext::new(
        prd_id.to_string(),
        store.set().branch_name().to_string(),
        std::env::current_dir()?,
        tuning,
    )?;

    execute_run(ctx, store, artifacts).await
}

/// Wire the coordinator together and drive the run to a verdict.
async fn execute_run(ctx: RunContext, store: TaskStore, artifacts: ArtifactWriter) -> Result<()> {
    let ctx = Arc::new(ctx);
    let git = GitRepo::open(&ctx.repo_root);

    if !git.branch_exists(&ctx.base_branch).await {
        return Err(AgentDagError::Precondition(format!(
            "integration branch '{}' does not exist",
            ctx.base_branch
        )));
    }

    let worktrees = WorktreeManager::new(
        git.clone(),
        ctx.worktree_root(),
        ctx.branch_prefix.clone(),
        ctx.base_branch.clone(),
    );
    worktrees.gc().await?;

    let task_set = store.set().clone();
    let scheduler = Scheduler::init(&task_set);
    let store = Arc::new(Mutex::new(store));

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let backend = RealSupervisorBackend::new(
        SupervisorDeps {
            ctx: Arc::clone(&ctx),
            git: git.clone(),
            worktrees,
            artifacts,
        },
        rt_tx.clone(),
    );

    let integrator = GitIntegrator::new(git, Arc::clone(&ctx), Arc::clone(&store));

    // Ctrl-C → graceful stop.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let core = CoreRuntime::new(
        scheduler,
        task_set,
        ctx.parallelism,
        ctx.max_iterations,
        ctx.external_fail_timeout,
    );
    let runtime = Runtime::new(core, rt_rx, rt_tx, backend, integrator);

    match runtime.run().await? {
        RunVerdict::Success => {
            println!("all tasks done ({})", ctx.prd_id);
            Ok(())
        }
        RunVerdict::Failed(reason) => Err(AgentDagError::RunFailed(reason)),
    }
}

/// Validated plan output for `--dry-run`: no git, no agents.
fn print_dry_run(ctx: &RunContext, store: &TaskStore) {
    println!("agentdag dry-run ({})", ctx.prd_id);
    println!("  branch: {}", ctx.base_branch);
    println!("  engine: {:?}  parallel: {}", ctx.engine, ctx.parallelism);
    println!();

    println!("tasks ({}):", store.set().tasks().len());
    for task in store.set().tasks() {
        let mark = if task.completed { "x" } else { " " };
        println!("  [{mark}] {}  {}", task.id, task.title);
        if !task.depends_on.is_empty() {
            println!("        dependsOn: {:?}", task.depends_on);
        }
        if !task.mutex.is_empty() {
            println!("        mutex: {:?}", task.mutex);
        }
    }
}

/// Read-only run summary for `status`.
fn show_status(run_root: &str, prd_id: &str) -> Result<()> {
    let run_dir = PathBuf::from(run_root).join(prd_id);
    let tasks_path = run_dir.join("tasks.toml");
    if !tasks_path.exists() {
        return Err(AgentDagError::Precondition(format!(
            "no run directory for prd-id '{prd_id}'"
        )));
    }

    let store = TaskStore::load(&tasks_path)?;
    println!("run {prd_id} ({})", store.set().branch_name());

    for task in store.set().tasks() {
        let report_path = run_dir.join("reports").join(format!("{}.json", task.id));
        let report_status = std::fs::read_to_string(&report_path)
            .ok()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
            .and_then(|v| v["status"].as_str().map(|s| s.to_string()));

        let mark = if task.completed { "x" } else { " " };
        match report_status {
            Some(status) => println!("  [{mark}] {}  {}  ({status})", task.id, task.title),
            None => println!("  [{mark}] {}  {}", task.id, task.title),
        }
    }
    Ok(())
}

/// Reinstall the released binary. Version negotiation is the package
/// manager's problem, not ours.
fn run_update() -> Result<()> {
    let status = std::process::Command::new("cargo")
        .args(["install", "agentdag", "--locked"])
        .status()
        .map_err(|e| AgentDagError::Precondition(format!("cannot run cargo: {e}")))?;
    if !status.success() {
        return Err(AgentDagError::RunFailed("update failed".to_string()));
    }
    Ok(())
}
