// tests/runtime_fake_backend.rs

//! Full coordinator-loop tests with fake supervisor and integration
//! backends: no processes, no git.

use std::sync::Arc;

use tokio::sync::mpsc;

use agentdag::dag::Scheduler;
use agentdag::engine::{CoreRuntime, RunVerdict, Runtime, RuntimeEvent};
use agentdag::tasks::TaskSet;

use agentdag_test_utils::builders::{TaskBuilder, TaskSetBuilder};
use agentdag_test_utils::fake_backend::{FakeIntegrator, FakeSupervisorBackend};
use agentdag_test_utils::{init_tracing, with_timeout};

const NO_CAP: u64 = 0;
const STOP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Build the full runtime wiring for one test run.
fn wire(
    set: TaskSet,
    parallelism: usize,
    max_iterations: u64,
    make_backend: impl FnOnce(mpsc::Sender<RuntimeEvent>) -> FakeSupervisorBackend,
    integrator: FakeIntegrator,
) -> (
    Runtime<FakeSupervisorBackend, FakeIntegrator>,
    Arc<std::sync::Mutex<Vec<String>>>,
    Arc<std::sync::Mutex<Vec<String>>>,
) {
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
    let backend = make_backend(tx.clone());
    let spawned = Arc::clone(&backend.spawned);
    let merged = Arc::clone(&integrator.merged);

    let scheduler = Scheduler::init(&set);
    let core = CoreRuntime::new(scheduler, set, parallelism, max_iterations, STOP_TIMEOUT);
    (
        Runtime::new(core, rx, tx, backend, integrator),
        spawned,
        merged,
    )
}

fn linear_chain() -> TaskSet {
    TaskSetBuilder::new()
        .with_task(TaskBuilder::new("A", "first step").build())
        .with_task(TaskBuilder::new("B", "second step").depends_on("A").build())
        .with_task(TaskBuilder::new("C", "third step").depends_on("B").build())
        .build()
}

#[tokio::test]
async fn linear_chain_completes_in_dependency_order() {
    init_tracing();

    let (runtime, spawned, merged) = wire(
        linear_chain(),
        3,
        NO_CAP,
        FakeSupervisorBackend::new,
        FakeIntegrator::new(),
    );

    let verdict = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(verdict, RunVerdict::Success);

    assert_eq!(*spawned.lock().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(*merged.lock().unwrap(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn independent_tasks_run_concurrently_up_to_parallelism() {
    init_tracing();

    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("A", "a").build())
        .with_task(TaskBuilder::new("B", "b").build())
        .with_task(TaskBuilder::new("C", "c").build())
        .build();

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
    let backend = FakeSupervisorBackend::new(tx.clone());
    let concurrency = Arc::clone(&backend.concurrency);

    let scheduler = Scheduler::init(&set);
    let core = CoreRuntime::new(scheduler, set, 2, NO_CAP, STOP_TIMEOUT);
    let runtime = Runtime::new(core, rx, tx, backend, FakeIntegrator::new());

    let verdict = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(verdict, RunVerdict::Success);

    let max = concurrency.lock().unwrap().max_observed;
    assert!(max <= 2, "parallelism bound violated: {max}");
}

#[tokio::test]
async fn parallelism_one_behaves_sequentially() {
    init_tracing();

    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("A", "a").build())
        .with_task(TaskBuilder::new("B", "b").build())
        .with_task(TaskBuilder::new("C", "c").build())
        .build();

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
    let backend = FakeSupervisorBackend::new(tx.clone());
    let concurrency = Arc::clone(&backend.concurrency);
    let spawned = Arc::clone(&backend.spawned);

    let scheduler = Scheduler::init(&set);
    let core = CoreRuntime::new(scheduler, set, 1, NO_CAP, STOP_TIMEOUT);
    let runtime = Runtime::new(core, rx, tx, backend, FakeIntegrator::new());

    let verdict = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(verdict, RunVerdict::Success);
    assert_eq!(concurrency.lock().unwrap().max_observed, 1);
    assert_eq!(*spawned.lock().unwrap(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn all_completed_run_is_a_no_op() {
    init_tracing();

    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("A", "a").completed(true).build())
        .with_task(
            TaskBuilder::new("B", "b")
                .depends_on("A")
                .completed(true)
                .build(),
        )
        .build();

    let (runtime, spawned, merged) = wire(
        set,
        3,
        NO_CAP,
        FakeSupervisorBackend::new,
        FakeIntegrator::new(),
    );

    let verdict = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(verdict, RunVerdict::Success);
    assert!(spawned.lock().unwrap().is_empty(), "no agent may be spawned");
    assert!(merged.lock().unwrap().is_empty());
}

#[tokio::test]
async fn merge_failure_fails_the_task_and_the_run() {
    init_tracing();

    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("A", "a").build())
        .build();

    let (runtime, _spawned, merged) = wire(
        set,
        3,
        NO_CAP,
        FakeSupervisorBackend::new,
        FakeIntegrator::new().fail_merge("A", "merge conflict in src/lib.rs not resolved by agent"),
    );

    let verdict = with_timeout(runtime.run()).await.unwrap();
    match verdict {
        RunVerdict::Failed(reason) => assert!(reason.contains("A"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(merged.lock().unwrap().is_empty());
}

#[tokio::test]
async fn conflicted_merge_resolved_by_fallback_still_completes() {
    init_tracing();

    // At the coordinator level a conflict the agent resolves is simply a
    // merge that eventually reports Merged; both tasks must complete.
    let set = TaskSetBuilder::new()
        .with_task(TaskBuilder::new("F1", "touch shared file").build())
        .with_task(
            TaskBuilder::new("F2", "touch shared file too")
                .merge_notes("keep both hunks")
                .build(),
        )
        .build();

    let (runtime, _spawned, merged) = wire(
        set,
        3,
        NO_CAP,
        FakeSupervisorBackend::new,
        FakeIntegrator::new(),
    );

    let verdict = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(verdict, RunVerdict::Success);

    let merged = merged.lock().unwrap();
    assert_eq!(merged.len(), 2);
    assert!(merged.contains(&"F1".to_string()) && merged.contains(&"F2".to_string()));
}

#[tokio::test]
async fn iteration_cap_stops_dispatching() {
    init_tracing();

    let (runtime, spawned, _merged) = wire(
        linear_chain(),
        3,
        1,
        FakeSupervisorBackend::new,
        FakeIntegrator::new(),
    );

    let verdict = with_timeout(runtime.run()).await.unwrap();
    match verdict {
        RunVerdict::Failed(reason) => assert!(reason.contains("iteration cap"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(*spawned.lock().unwrap(), vec!["A"]);
}
