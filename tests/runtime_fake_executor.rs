// tests/runtime_fake_executor.rs
//
// Drives the async runtime shell directly with a fake executor, so dispatch
// order and completion handling can be observed without worker threads.

use std::error::Error;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, timeout};

use taskq::dag::Scheduler;
use taskq::engine::runtime::RuntimeOptions;
use taskq::engine::{CoreRuntime, Runtime, RuntimeEvent};
use taskq::{SchedulerSnapshot, TaskState, Unit};
use taskq_test_utils::builders::{chain, failing, noop};
use taskq_test_utils::fake_executor::FakeExecutor;
use taskq_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
    snapshots: watch::Receiver<SchedulerSnapshot>,
    executed: Arc<Mutex<Vec<String>>>,
    resizes: Arc<Mutex<Vec<usize>>>,
    handle: tokio::task::JoinHandle<taskq::errors::Result<()>>,
}

fn spawn_runtime(max_workers: usize) -> Harness {
    let (tx, rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(64);
    let (snapshot_tx, snapshots) = watch::channel(SchedulerSnapshot::default());
    let executed = Arc::new(Mutex::new(Vec::new()));

    let executor = FakeExecutor::new(tx.clone(), Arc::clone(&executed));
    let resizes = executor.resizes();
    let core = CoreRuntime::new(Scheduler::default(), max_workers);
    let options = RuntimeOptions {
        idle_timeout: Duration::from_millis(50),
    };

    let runtime = Runtime::new(core, rx, tx.clone(), executor, options, events, snapshot_tx);
    let handle = tokio::spawn(runtime.run());

    Harness {
        tx,
        snapshots,
        executed,
        resizes,
        handle,
    }
}

impl Harness {
    async fn submit(&self, units: Vec<Unit>) -> TestResult {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RuntimeEvent::Submit { units, reply })?;
        rx.await??;
        Ok(())
    }

    async fn wait_quiescent(&mut self) -> TestResult {
        timeout(
            Duration::from_secs(2),
            self.snapshots.wait_for(SchedulerSnapshot::is_quiescent),
        )
        .await??;
        Ok(())
    }

    async fn stop(self) -> TestResult {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RuntimeEvent::Stop { wait: true, reply })?;
        rx.await?;
        timeout(Duration::from_secs(2), self.handle).await???;
        Ok(())
    }
}

#[tokio::test]
async fn runtime_dispatches_chain_in_order() -> TestResult {
    init_tracing();

    let mut harness = spawn_runtime(2);
    let units: Vec<Unit> = chain(&["A", "B", "C"]).into_iter().map(Unit::from).collect();
    harness.submit(units).await?;
    harness.tx.send(RuntimeEvent::StartWorkers)?;
    harness.wait_quiescent().await?;

    assert_eq!(*harness.executed.lock().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(*harness.resizes.lock().unwrap(), vec![2]);
    assert_eq!(harness.snapshots.borrow().counts().succeeded, 3);

    harness.stop().await
}

#[tokio::test]
async fn runtime_retries_failures_through_the_backend() -> TestResult {
    init_tracing();

    let mut harness = spawn_runtime(1);
    let bad = failing("bad").with_max_retries(2).build()?;
    let good = noop("good").build()?;
    let bad_id = bad.id();
    harness.submit(vec![bad.into(), good.into()]).await?;
    harness.tx.send(RuntimeEvent::StartWorkers)?;
    harness.wait_quiescent().await?;

    let executed = harness.executed.lock().unwrap().clone();
    assert_eq!(executed.iter().filter(|l| *l == "bad").count(), 3);
    assert_eq!(executed.iter().filter(|l| *l == "good").count(), 1);

    let snap = harness.snapshots.borrow().get(bad_id).cloned().unwrap();
    assert_eq!(snap.state, TaskState::Failed);
    assert_eq!(snap.attempt_count, 3);

    harness.stop().await
}

#[tokio::test]
async fn stale_completion_is_ignored() -> TestResult {
    init_tracing();

    let mut harness = spawn_runtime(1);
    let task = noop("once").build()?;
    let id = task.id();
    harness.submit(vec![task.into()]).await?;
    harness.tx.send(RuntimeEvent::StartWorkers)?;
    harness.wait_quiescent().await?;

    // A late report for a dispatch that never happened changes nothing.
    harness.tx.send(RuntimeEvent::TaskCompleted {
        task: id,
        dispatch: 7_000,
        outcome: taskq::TaskOutcome::Failed(taskq::TaskExecutionError::Aborted),
    })?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = harness.snapshots.borrow().get(id).cloned().unwrap();
    assert_eq!(snap.state, TaskState::Succeeded);
    assert_eq!(snap.attempt_count, 1);

    harness.stop().await
}
