// tests/vcs_git.rs

//! Worktree lifecycle and merge-back against a real (temporary) git
//! repository. These tests exercise the git plumbing but never spawn an
//! agent: conflict-free merges only.

use std::path::Path;
use std::sync::{Arc, Mutex};

use agentdag::cli::{EngineKind, TuningArgs};
use agentdag::config::RunContext;
use agentdag::tasks::TaskStore;
use agentdag::vcs::git::GitRepo;
use agentdag::vcs::integrate::{GitIntegrator, IntegrationBackend, MergeOutcome, MergeRequest};
use agentdag::vcs::worktree::{Teardown, WorktreeManager};

use agentdag_test_utils::builders::{TaskBuilder, TaskSetBuilder};
use agentdag_test_utils::init_tracing;

async fn init_repo(root: &Path) -> GitRepo {
    let git = GitRepo::open(root);
    git.run(&["init"]).await.unwrap();
    git.run(&["config", "user.email", "runner@example.com"])
        .await
        .unwrap();
    git.run(&["config", "user.name", "runner"]).await.unwrap();
    std::fs::write(root.join("README.md"), "# demo\n").unwrap();
    git.run(&["add", "-A"]).await.unwrap();
    git.run(&["commit", "-m", "initial"]).await.unwrap();
    git.run(&["branch", "-M", "main"]).await.unwrap();
    git
}

fn manager(git: &GitRepo, root: &Path) -> WorktreeManager {
    WorktreeManager::new(
        git.clone(),
        root.join("worktrees"),
        "agentdag".to_string(),
        "main".to_string(),
    )
}

fn tuning(run_root: &Path) -> TuningArgs {
    TuningArgs {
        engine: EngineKind::Claude,
        parallel: 3,
        max_retries: 2,
        stalled_timeout: 300,
        external_fail_timeout: 60,
        max_iterations: 0,
        branch_prefix: "agentdag".to_string(),
        run_root: run_root.to_string_lossy().into_owned(),
        unrestricted: false,
    }
}

#[tokio::test]
async fn worktree_isolates_commits_on_a_task_branch() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let git = init_repo(dir.path()).await;
    let manager = manager(&git, dir.path());

    let wt = manager.create(1, "Add login endpoint").await.unwrap();
    assert_eq!(wt.branch, "agentdag/agent-1-add-login-endpoint");
    assert!(wt.path.join("README.md").exists());

    std::fs::write(wt.path.join("login.rs"), "fn login() {}\n").unwrap();
    git.commit_all(&wt.path, "add login").await.unwrap();

    assert_eq!(git.count_commits("main", &wt.branch).await.unwrap(), 1);
    assert_eq!(
        git.changed_files("main", &wt.branch).await.unwrap(),
        vec!["login.rs".to_string()]
    );

    // Clean tree: the worktree goes away, the branch survives for the
    // integrator.
    let teardown = manager.teardown(&wt, false).await.unwrap();
    assert_eq!(teardown, Teardown::Removed);
    assert!(!wt.path.exists());
    assert!(git.branch_exists(&wt.branch).await);
}

#[tokio::test]
async fn dirty_worktrees_are_preserved_for_inspection() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let git = init_repo(dir.path()).await;
    let manager = manager(&git, dir.path());

    let wt = manager.create(2, "Half finished work").await.unwrap();
    std::fs::write(wt.path.join("wip.rs"), "// not committed\n").unwrap();

    let teardown = manager.teardown(&wt, true).await.unwrap();
    assert_eq!(teardown, Teardown::PreservedDirty);
    assert!(wt.path.join("wip.rs").exists());
}

#[tokio::test]
async fn create_replaces_a_crashed_predecessor() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let git = init_repo(dir.path()).await;
    let manager = manager(&git, dir.path());

    let first = manager.create(3, "Same title").await.unwrap();
    std::fs::write(first.path.join("junk.rs"), "// left behind\n").unwrap();

    // Same slot and title: the stale worktree and branch are replaced.
    let second = manager.create(3, "Same title").await.unwrap();
    assert_eq!(first.branch, second.branch);
    assert!(!second.path.join("junk.rs").exists());
}

#[tokio::test]
async fn gc_deletes_agent_branches_without_worktrees() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let git = init_repo(dir.path()).await;
    let manager = manager(&git, dir.path());

    let wt = manager.create(4, "Crashed run leftovers").await.unwrap();
    // Simulate a crash: the directory vanishes without teardown.
    std::fs::remove_dir_all(&wt.path).unwrap();

    manager.gc().await.unwrap();
    assert!(!git.branch_exists(&wt.branch).await);
}

#[tokio::test]
async fn clean_merge_completes_the_task_on_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let git = init_repo(dir.path()).await;
    let manager = manager(&git, dir.path());

    let set = TaskSetBuilder::new()
        .branch("main")
        .with_task(TaskBuilder::new("TASK-001", "Add login endpoint").build())
        .build();
    let run_root = dir.path().join(".agentdag");
    std::fs::create_dir_all(run_root.join("demo")).unwrap();
    let store = Arc::new(Mutex::new(
        TaskStore::create(run_root.join("demo/tasks.toml"), set).unwrap(),
    ));

    let ctx = Arc::new(
        RunContext::new(
            "demo".to_string(),
            "main".to_string(),
            dir.path().to_path_buf(),
            &tuning(&run_root),
        )
        .unwrap(),
    );
    std::fs::create_dir_all(ctx.reports_dir()).unwrap();

    // Produce one commit on a task branch, as a supervisor would.
    let wt = manager.create(1, "Add login endpoint").await.unwrap();
    std::fs::write(wt.path.join("login.rs"), "fn login() {}\n").unwrap();
    git.commit_all(&wt.path, "add login").await.unwrap();
    manager.teardown(&wt, false).await.unwrap();

    let mut integrator = GitIntegrator::new(git.clone(), ctx, Arc::clone(&store));
    let outcome = integrator
        .merge_task(MergeRequest {
            task_id: "TASK-001".to_string(),
            title: "Add login endpoint".to_string(),
            branch: wt.branch.clone(),
            merge_notes: None,
        })
        .await;
    assert_eq!(outcome, MergeOutcome::Merged);

    // Commits are on the integration branch, the task branch is gone,
    // and completion reached the tasks document.
    assert!(dir.path().join("login.rs").exists());
    assert!(!git.branch_exists(&wt.branch).await);
    assert!(store.lock().unwrap().is_completed("TASK-001"));
}
