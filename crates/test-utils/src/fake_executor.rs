use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use taskq::dag::ScheduledTask;
use taskq::engine::{RuntimeEvent, TaskOutcome};
use taskq::errors::SchedulerError;
use taskq::exec::ExecutorBackend;
use taskq::exec::backend::BackendFuture;
use taskq::{TaskExecutionError, TaskHandle};

/// A fake executor that:
/// - records which tasks were "run", in dispatch order
/// - runs each body inline and immediately reports `TaskCompleted`
/// - records resize and shutdown requests
pub struct FakeExecutor {
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    resizes: Arc<Mutex<Vec<usize>>>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            resizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn resizes(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.resizes)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(&mut self, tasks: Vec<ScheduledTask>) -> BackendFuture<'_> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            for t in tasks {
                executed.lock().unwrap().push(t.label.clone());

                let handle = TaskHandle::detached(t.id, t.label.clone(), t.attempt);
                let outcome = match catch_unwind(AssertUnwindSafe(|| (t.body)(&handle))) {
                    Ok(Ok(())) => TaskOutcome::Success,
                    Ok(Err(err)) => TaskOutcome::Failed(TaskExecutionError::Body(format!("{err:#}"))),
                    Err(_) => TaskOutcome::Failed(TaskExecutionError::Panicked("fake".into())),
                };

                tx.send(RuntimeEvent::TaskCompleted {
                    task: t.id,
                    dispatch: t.dispatch,
                    outcome,
                })
                .map_err(|_| SchedulerError::ShuttingDown)?;
            }
            Ok::<(), SchedulerError>(())
        })
    }

    fn resize(&mut self, workers: usize) -> BackendFuture<'_> {
        self.resizes.lock().unwrap().push(workers);
        Box::pin(async { Ok(()) })
    }
}
