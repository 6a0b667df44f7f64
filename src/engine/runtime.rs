// src/engine/runtime.rs

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::dag::{DelayedPredicate, DelayedRetry, Notification, ScheduledTask};
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::task::{SchedulerSnapshot, TaskId};

use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RuntimeEvent, SchedulerEvent};

/// Knobs for the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// How long the loop may go without dispatching anything before it
    /// checks for stalls and idleness.
    pub idle_timeout: Duration,
}

/// Reply to send once the commands of the current step have run and the new
/// snapshot is visible.
enum PendingReply {
    Ids(oneshot::Sender<Result<Vec<TaskId>>>, Result<Vec<TaskId>>),
    Done(oneshot::Sender<()>),
}

/// Drives the core in response to `RuntimeEvent`s and delegates execution of
/// task bodies to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. This struct handles async IO: reading events,
/// invoking callbacks, running retry timers, publishing snapshots and
/// dispatching tasks to the executor. Everything here runs on one thread.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    /// Used by timers to post `RetryDue` and `PredicateDue`.
    event_tx: mpsc::UnboundedSender<RuntimeEvent>,
    executor: E,
    options: RuntimeOptions,
    events: broadcast::Sender<SchedulerEvent>,
    snapshots: watch::Sender<SchedulerSnapshot>,
    /// Version of the last published snapshot.
    published: Option<(u64, usize, usize, bool)>,
    replies: Vec<PendingReply>,
    stop_replies: Vec<oneshot::Sender<()>>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        event_tx: mpsc::UnboundedSender<RuntimeEvent>,
        executor: E,
        options: RuntimeOptions,
        events: broadcast::Sender<SchedulerEvent>,
        snapshots: watch::Sender<SchedulerSnapshot>,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            executor,
            options,
            events,
            snapshots,
            published: None,
            replies: Vec::new(),
            stop_replies: Vec::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core (callbacks, dispatch, timers).
    /// - Runs an idle check whenever nothing was dispatched for
    ///   `idle_timeout`.
    pub async fn run(mut self) -> Result<()> {
        info!(idle_timeout = ?self.options.idle_timeout, "coordinator loop started");
        self.publish_snapshot();

        let mut deadline = Instant::now() + self.options.idle_timeout;

        loop {
            let step = tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    deadline = Instant::now() + self.options.idle_timeout;
                    self.core.idle_tick()
                }
            };

            if step
                .commands
                .iter()
                .any(|c| matches!(c, CoreCommand::Dispatch(_)))
            {
                deadline = Instant::now() + self.options.idle_timeout;
            }

            let keep_running = step.keep_running;
            for command in step.commands {
                self.execute_command(command).await;
            }

            self.publish_snapshot();
            self.flush_replies();

            if !keep_running {
                info!("core requested exit; stopping coordinator loop");
                break;
            }
        }

        self.publish_snapshot();
        self.flush_replies();
        for reply in self.stop_replies.drain(..) {
            let _ = reply.send(());
        }

        info!("coordinator loop exiting");
        Ok(())
    }

    fn handle_event(&mut self, event: RuntimeEvent) -> CoreStep {
        trace!(?event, "coordinator received event");

        match event {
            RuntimeEvent::Submit { units, reply } => {
                let (result, step) = self.core.submit(units);
                self.replies.push(PendingReply::Ids(reply, result));
                step
            }
            RuntimeEvent::StartWorkers => self.core.start_workers(),
            RuntimeEvent::Resize { workers } => self.core.resize(workers),
            RuntimeEvent::Stop { wait, reply } => {
                self.stop_replies.push(reply);
                self.core.stop(wait)
            }
            RuntimeEvent::Clear { reply } => {
                let step = self.core.clear();
                self.replies.push(PendingReply::Done(reply));
                step
            }
            RuntimeEvent::Remove { task, reply } => {
                let (result, step) = self.core.remove(task);
                self.replies.push(PendingReply::Ids(reply, result));
                step
            }
            RuntimeEvent::Retry { task, reply } => {
                let (result, step) = self.core.retry(task);
                self.replies.push(PendingReply::Ids(reply, result));
                step
            }
            RuntimeEvent::TaskCompleted {
                task,
                dispatch,
                outcome,
            } => self.core.complete(task, dispatch, outcome),
            RuntimeEvent::TaskProgressed {
                task,
                dispatch,
                value,
            } => self.core.progress(task, dispatch, value),
            RuntimeEvent::RetryDue { task, dispatch } => self.core.retry_due(task, dispatch),
            RuntimeEvent::PredicateDue { task, token } => self.core.predicate_due(task, token),
        }
    }

    /// Execute a single command from the core.
    ///
    /// Failures are logged and never end the loop.
    async fn execute_command(&mut self, command: CoreCommand) {
        let result = match command {
            CoreCommand::Notify(notifications) => {
                self.invoke_callbacks(notifications);
                Ok(())
            }
            CoreCommand::Dispatch(tasks) => self.spawn_ready(tasks).await,
            CoreCommand::ScheduleRetry(retry) => {
                self.schedule_retry(retry);
                Ok(())
            }
            CoreCommand::SchedulePredicate(predicate) => {
                self.schedule_predicate(predicate);
                Ok(())
            }
            CoreCommand::ResizePool(workers) => self.executor.resize(workers).await,
            CoreCommand::Emit(event) => {
                self.emit(event);
                Ok(())
            }
            CoreCommand::ShutdownPool { wait } => self.executor.shutdown(wait).await,
        };

        if let Err(err) = result {
            error!(error = %err, "executor command failed");
        }
    }

    fn invoke_callbacks(&mut self, notifications: Vec<Notification>) {
        for notification in notifications {
            let Some(callback) = notification.callback else {
                continue;
            };

            let snapshot = &notification.snapshot;
            debug!(
                task = %snapshot.id,
                label = %snapshot.label,
                kind = %notification.kind,
                "invoking callback"
            );

            if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                warn!(
                    task = %snapshot.id,
                    label = %snapshot.label,
                    kind = %notification.kind,
                    "callback panicked; continuing"
                );
                self.emit(SchedulerEvent::CallbackPanicked {
                    task: snapshot.id,
                    kind: notification.kind,
                });
            }
        }
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let labels: Vec<_> = tasks.iter().map(|t| t.label.as_str()).collect();
        debug!(?labels, "dispatching ready tasks to executor");

        self.executor.spawn_ready_tasks(tasks).await
    }

    fn schedule_retry(&self, retry: DelayedRetry) {
        debug!(task = %retry.task, dispatch = retry.dispatch, delay = ?retry.delay, "scheduling delayed retry");

        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retry.delay).await;
            let _ = tx.send(RuntimeEvent::RetryDue {
                task: retry.task,
                dispatch: retry.dispatch,
            });
        });
    }

    fn schedule_predicate(&self, predicate: DelayedPredicate) {
        debug!(task = %predicate.task, delay = ?predicate.delay, "scheduling predicate re-evaluation");

        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(predicate.delay).await;
            let _ = tx.send(RuntimeEvent::PredicateDue {
                task: predicate.task,
                token: predicate.token,
            });
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Publish a new snapshot if anything visible changed since the last one.
    fn publish_snapshot(&mut self) {
        let version = self.core.snapshot_version();
        if self.published == Some(version) {
            return;
        }
        self.published = Some(version);
        self.snapshots.send_replace(self.core.snapshot());
    }

    fn flush_replies(&mut self) {
        for reply in self.replies.drain(..) {
            match reply {
                PendingReply::Ids(tx, result) => {
                    let _ = tx.send(result);
                }
                PendingReply::Done(tx) => {
                    let _ = tx.send(());
                }
            }
        }
    }
}
