// src/exec/task_runner.rs

//! Individual task body runner.

use std::any::Any;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::errors::TaskExecutionError;
use crate::task::TaskHandle;

/// Run one task body on the blocking thread pool and classify the result.
///
/// Errors returned by the body and panics inside it both become
/// [`TaskOutcome::Failed`]; nothing escapes to the caller.
pub async fn run_job(
    task: &ScheduledTask,
    events: Option<mpsc::UnboundedSender<RuntimeEvent>>,
) -> TaskOutcome {
    info!(
        task = %task.id,
        label = %task.label,
        attempt = task.attempt,
        "starting task body"
    );

    let handle = match events {
        Some(tx) => TaskHandle::new(task.id, task.label.clone(), task.attempt, task.dispatch, tx),
        None => TaskHandle::detached(task.id, task.label.clone(), task.attempt),
    };
    let body = task.body.clone();

    let joined = tokio::task::spawn_blocking(move || body(&handle)).await;

    let outcome = match joined {
        Ok(Ok(())) => TaskOutcome::Success,
        Ok(Err(err)) => TaskOutcome::Failed(TaskExecutionError::Body(format!("{err:#}"))),
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            TaskOutcome::Failed(TaskExecutionError::Panicked(message))
        }
        Err(join_err) => {
            warn!(task = %task.id, error = %join_err, "task body did not run to completion");
            TaskOutcome::Failed(TaskExecutionError::Aborted)
        }
    };

    match &outcome {
        TaskOutcome::Success => {
            debug!(task = %task.id, attempt = task.attempt, "task body returned successfully")
        }
        TaskOutcome::Failed(err) => {
            warn!(task = %task.id, label = %task.label, attempt = task.attempt, error = %err, "task body failed")
        }
    }

    outcome
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::task::TaskId;

    fn scheduled<F>(body: F) -> ScheduledTask
    where
        F: Fn(&TaskHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        ScheduledTask {
            id: TaskId::new(),
            label: "job".into(),
            attempt: 1,
            dispatch: 1,
            body: Arc::new(body),
        }
    }

    #[tokio::test]
    async fn ok_body_is_success() {
        let task = scheduled(|_| Ok(()));
        assert_eq!(run_job(&task, None).await, TaskOutcome::Success);
    }

    #[tokio::test]
    async fn error_body_keeps_message() {
        let task = scheduled(|_| Err(anyhow::anyhow!("disk full")));
        assert_eq!(
            run_job(&task, None).await,
            TaskOutcome::Failed(TaskExecutionError::Body("disk full".into()))
        );
    }

    #[tokio::test]
    async fn panicking_body_is_contained() {
        let task = scheduled(|_| panic!("kaboom"));
        assert_eq!(
            run_job(&task, None).await,
            TaskOutcome::Failed(TaskExecutionError::Panicked("kaboom".into()))
        );
    }

    #[tokio::test]
    async fn body_sees_its_attempt_number() {
        let mut task = scheduled(|h| {
            if h.attempt() == 3 {
                Ok(())
            } else {
                Err(anyhow::anyhow!("attempt {}", h.attempt()))
            }
        });
        task.attempt = 3;
        assert_eq!(run_job(&task, None).await, TaskOutcome::Success);
    }
}
