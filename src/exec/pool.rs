// src/exec/pool.rs

//! Resizable worker pool.
//!
//! Workers are tokio tasks on the coordinator's runtime that pull one job at
//! a time from a shared queue and run its body on the blocking thread pool.
//! Growing the pool spawns workers immediately; shrinking lets surplus
//! workers exit once they are idle, after finishing their current job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::errors::{Result, SchedulerError};
use crate::exec::backend::{BackendFuture, ExecutorBackend};
use crate::exec::task_runner::run_job;
use crate::task::TaskId;

struct Job {
    task: ScheduledTask,
    done: oneshot::Sender<TaskOutcome>,
}

/// Handle for one submitted job.
#[derive(Debug)]
pub struct JobHandle {
    task: TaskId,
    attempt: u32,
    done: oneshot::Receiver<TaskOutcome>,
}

impl JobHandle {
    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Wait for the job's outcome. `None` if the pool was torn down before
    /// the job ran.
    pub async fn outcome(self) -> Option<TaskOutcome> {
        self.done.await.ok()
    }
}

#[derive(Debug, Default)]
struct PoolSize {
    target: usize,
    live: usize,
}

struct PoolShared {
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>,
    size: Mutex<PoolSize>,
    resized: Notify,
    events: Option<mpsc::UnboundedSender<RuntimeEvent>>,
    next_worker: AtomicUsize,
}

impl PoolShared {
    fn size(&self) -> MutexGuard<'_, PoolSize> {
        self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim one surplus slot; the caller must exit if this returns `true`.
    fn try_retire(&self) -> bool {
        let mut size = self.size();
        if size.live > size.target {
            size.live -= 1;
            true
        } else {
            false
        }
    }

    fn worker_gone(&self) {
        let mut size = self.size();
        size.live = size.live.saturating_sub(1);
    }
}

/// Pool of workers executing [`ScheduledTask`]s.
///
/// Completions are posted to the coordinator as
/// [`RuntimeEvent::TaskCompleted`]; workers never invoke user callbacks.
pub struct WorkerPool {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create an empty pool. Call [`resize`](Self::resize) to spawn workers.
    ///
    /// Must be used from within a tokio runtime.
    pub fn new(events: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self::build(Some(events))
    }

    /// A pool that reports outcomes only through [`JobHandle`]s.
    pub fn standalone() -> Self {
        Self::build(None)
    }

    fn build(events: Option<mpsc::UnboundedSender<RuntimeEvent>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            jobs: Some(tx),
            shared: Arc::new(PoolShared {
                queue: tokio::sync::Mutex::new(rx),
                size: Mutex::new(PoolSize::default()),
                resized: Notify::new(),
                events,
                next_worker: AtomicUsize::new(0),
            }),
            workers: Vec::new(),
        }
    }

    /// Workers currently alive (including ones about to retire).
    pub fn live_workers(&self) -> usize {
        self.shared.size().live
    }

    pub fn target_workers(&self) -> usize {
        self.shared.size().target
    }

    /// Set the number of workers.
    pub fn resize(&mut self, workers: usize) {
        if self.jobs.is_none() {
            debug!(workers, "resize after shutdown; ignoring");
            return;
        }

        let missing = {
            let mut size = self.shared.size();
            size.target = workers;
            let missing = workers.saturating_sub(size.live);
            size.live += missing;
            missing
        };

        for _ in 0..missing {
            let worker = self.shared.next_worker.fetch_add(1, Ordering::Relaxed);
            let shared = Arc::clone(&self.shared);
            self.workers.push(tokio::spawn(worker_loop(worker, shared)));
        }

        self.workers.retain(|h| !h.is_finished());
        self.shared.resized.notify_waiters();
        info!(workers, spawned = missing, "worker pool resized");
    }

    /// Queue one task for the next free worker.
    pub fn submit(&self, task: ScheduledTask) -> Result<JobHandle> {
        let jobs = self.jobs.as_ref().ok_or(SchedulerError::ShuttingDown)?;

        let (done_tx, done_rx) = oneshot::channel();
        let handle = JobHandle {
            task: task.id,
            attempt: task.attempt,
            done: done_rx,
        };

        jobs.send(Job {
            task,
            done: done_tx,
        })
        .map_err(|_| SchedulerError::ShuttingDown)?;

        Ok(handle)
    }

    /// Stop accepting jobs and retire every worker.
    ///
    /// With `wait`, resolves once all workers have exited, which includes
    /// finishing whatever they were running.
    pub async fn shutdown(&mut self, wait: bool) {
        self.jobs = None;
        self.shared.size().target = 0;
        self.shared.resized.notify_waiters();

        if !wait {
            info!("worker pool shutting down without waiting");
            return;
        }

        info!(workers = self.workers.len(), "waiting for workers to finish");
        for handle in self.workers.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker ended abnormally");
            }
        }
    }
}

impl ExecutorBackend for WorkerPool {
    fn spawn_ready_tasks(&mut self, tasks: Vec<ScheduledTask>) -> BackendFuture<'_> {
        let submitted: Result<Vec<JobHandle>> =
            tasks.into_iter().map(|task| self.submit(task)).collect();
        Box::pin(async move { submitted.map(|_| ()) })
    }

    fn resize(&mut self, workers: usize) -> BackendFuture<'_> {
        WorkerPool::resize(self, workers);
        Box::pin(async { Ok(()) })
    }

    fn shutdown(&mut self, wait: bool) -> BackendFuture<'_> {
        Box::pin(async move {
            WorkerPool::shutdown(self, wait).await;
            Ok(())
        })
    }
}

async fn worker_loop(worker: usize, shared: Arc<PoolShared>) {
    debug!(worker, "worker started");

    loop {
        let resized = shared.resized.notified();
        tokio::pin!(resized);
        resized.as_mut().enable();

        if shared.try_retire() {
            debug!(worker, "worker retiring");
            return;
        }

        let job = {
            let mut queue = shared.queue.lock().await;
            if shared.try_retire() {
                debug!(worker, "worker retiring");
                return;
            }

            tokio::select! {
                job = queue.recv() => job,
                _ = &mut resized => continue,
            }
        };

        let Some(Job { task, done }) = job else {
            debug!(worker, "job queue closed; worker exiting");
            shared.worker_gone();
            return;
        };

        let outcome = run_job(&task, shared.events.clone()).await;
        let _ = done.send(outcome.clone());

        if let Some(events) = &shared.events {
            let sent = events.send(RuntimeEvent::TaskCompleted {
                task: task.id,
                dispatch: task.dispatch,
                outcome,
            });
            if sent.is_err() {
                debug!(worker, task = %task.id, "coordinator gone; dropping completion");
            }
        }
    }
}
