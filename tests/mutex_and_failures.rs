// tests/mutex_and_failures.rs

//! Mutex serialization, failure policy, and graceful stop, driven
//! through the full coordinator loop with fake backends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use agentdag::dag::Scheduler;
use agentdag::engine::{CoreRuntime, RunVerdict, Runtime, RuntimeEvent};
use agentdag::exec::FailureKind;
use agentdag::tasks::TaskSet;

use agentdag_test_utils::builders::{TaskBuilder, TaskSetBuilder};
use agentdag_test_utils::fake_backend::{FakeIntegrator, FakeSupervisorBackend, Script};
use agentdag_test_utils::{init_tracing, with_timeout};

fn run_with(
    set: TaskSet,
    parallelism: usize,
    stop_timeout: Duration,
    make_backend: impl FnOnce(mpsc::Sender<RuntimeEvent>) -> FakeSupervisorBackend,
) -> (
    Runtime<FakeSupervisorBackend, FakeIntegrator>,
    Arc<std::sync::Mutex<Vec<String>>>,
    Arc<std::sync::Mutex<agentdag_test_utils::fake_backend::Concurrency>>,
) {
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
    let backend = make_backend(tx.clone());
    let spawned = Arc::clone(&backend.spawned);
    let concurrency = Arc::clone(&backend.concurrency);

    let scheduler = Scheduler::init(&set);
    let core = CoreRuntime::new(scheduler, set, parallelism, 0, stop_timeout);
    (
        Runtime::new(core, rx, tx, backend, FakeIntegrator::new()),
        spawned,
        concurrency,
    )
}

#[tokio::test]
async fn shared_mutex_serializes_two_independent_tasks() {
    init_tracing();

    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("X", "migrate up").mutex("db-migrations").build())
        .with_task(TaskBuilder::new("Y", "migrate down").mutex("db-migrations").build())
        .build();

    let (runtime, spawned, concurrency) = run_with(
        set,
        3,
        Duration::from_secs(1),
        FakeSupervisorBackend::new,
    );

    let verdict = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(verdict, RunVerdict::Success);

    // Both ran, but never at the same time.
    let spawned = spawned.lock().unwrap();
    assert_eq!(spawned.len(), 2);
    assert_eq!(concurrency.lock().unwrap().max_observed, 1);
}

#[tokio::test]
async fn internal_failure_keeps_independent_tasks_running() {
    init_tracing();

    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("BAD", "fails").build())
        .with_task(TaskBuilder::new("GOOD", "succeeds").build())
        .build();

    let (runtime, spawned, _) = run_with(set, 1, Duration::from_secs(1), |tx| {
        FakeSupervisorBackend::new(tx).script(
            "BAD",
            Script::Fail(FailureKind::Internal, "assertion failed".to_string()),
        )
    });

    let verdict = with_timeout(runtime.run()).await.unwrap();
    match verdict {
        RunVerdict::Failed(reason) => assert!(reason.contains("BAD"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    // The internal failure did not stop dispatching.
    assert_eq!(*spawned.lock().unwrap(), vec!["BAD", "GOOD"]);
}

#[tokio::test]
async fn external_failure_enters_graceful_stop_and_cancels_on_deadline() {
    init_tracing();

    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("N", "hits the network").build())
        .with_task(TaskBuilder::new("SLOW", "long running").build())
        .with_task(TaskBuilder::new("LATER", "never starts").depends_on("N").build())
        .build();

    // Stop deadline 0: cancellation is immediate.
    let (runtime, spawned, _) = run_with(set, 3, Duration::from_secs(0), |tx| {
        FakeSupervisorBackend::new(tx)
            .script(
                "N",
                Script::Fail(FailureKind::External, "network: ETIMEDOUT".to_string()),
            )
            .script("SLOW", Script::Hang)
    });

    let verdict = with_timeout(runtime.run()).await.unwrap();
    match verdict {
        RunVerdict::Failed(reason) => {
            assert!(reason.contains("external failure"), "{reason}");
            assert!(reason.contains("N"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // No task was dispatched after the external failure.
    let spawned = spawned.lock().unwrap();
    assert!(spawned.contains(&"N".to_string()));
    assert!(spawned.contains(&"SLOW".to_string()));
    assert!(!spawned.contains(&"LATER".to_string()));
}

#[tokio::test]
async fn failed_dependency_ends_in_a_deadlock_report() {
    init_tracing();

    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("A", "fails").build())
        .with_task(TaskBuilder::new("B", "blocked forever").depends_on("A").build())
        .build();

    let (runtime, spawned, _) = run_with(set, 3, Duration::from_secs(1), |tx| {
        FakeSupervisorBackend::new(tx).script(
            "A",
            Script::Fail(FailureKind::Internal, "broke".to_string()),
        )
    });

    let verdict = with_timeout(runtime.run()).await.unwrap();
    match verdict {
        RunVerdict::Failed(reason) => assert!(reason.contains("deadlock"), "{reason}"),
        other => panic!("expected deadlock, got {other:?}"),
    }
    assert_eq!(*spawned.lock().unwrap(), vec!["A"]);
}

#[tokio::test]
async fn mutexes_of_cancelled_tasks_are_released() {
    init_tracing();

    // HOG holds the mutex and hangs; N fails externally, the run stops,
    // HOG is cancelled. The run must terminate rather than wedge on the
    // held mutex.
    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("HOG", "holds lock").mutex("lockfile").build())
        .with_task(TaskBuilder::new("N", "external").build())
        .with_task(TaskBuilder::new("WANTS", "wants lock").mutex("lockfile").depends_on("N").build())
        .build();

    let (runtime, _, _) = run_with(set, 3, Duration::from_secs(0), |tx| {
        FakeSupervisorBackend::new(tx)
            .script("HOG", Script::Hang)
            .script(
                "N",
                Script::Fail(FailureKind::External, "dns failure".to_string()),
            )
    });

    let verdict = with_timeout(runtime.run()).await.unwrap();
    assert!(matches!(verdict, RunVerdict::Failed(_)));
}
