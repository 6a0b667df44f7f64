// src/engine/coordinator.rs

//! Public handle to a running coordinator.
//!
//! [`Coordinator::new`] spawns a dedicated OS thread (`taskq-coordinator`)
//! that runs a current-thread tokio runtime. The event loop, every state
//! transition and every user callback live on that thread; task bodies run on
//! its blocking pool (`taskq-worker` threads). The handle itself is a thin
//! sender plus read-only snapshot and event receivers, so it can be used from
//! any thread or runtime.

use std::thread;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info};

use crate::config::{SchedulerSettings, validate_settings};
use crate::dag::Scheduler;
use crate::engine::core::CoreRuntime;
use crate::engine::runtime::{Runtime, RuntimeOptions};
use crate::engine::{RuntimeEvent, SchedulerEvent};
use crate::errors::{Result, SchedulerError};
use crate::exec::WorkerPool;
use crate::task::{SchedulerSnapshot, TaskGroupBuilder, TaskId, TaskSnapshot, Unit};

const COORDINATOR_THREAD: &str = "taskq-coordinator";
const WORKER_THREAD: &str = "taskq-worker";

/// Entry point of the library: accepts tasks and groups, runs them on a
/// bounded worker pool and delivers callbacks on a single thread.
///
/// Dropping the coordinator stops it without waiting for running tasks.
#[derive(Debug)]
pub struct Coordinator {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
    events: broadcast::Sender<SchedulerEvent>,
    snapshots: watch::Receiver<SchedulerSnapshot>,
    settings: SchedulerSettings,
}

impl Coordinator {
    /// Spawn the coordinator thread. Workers are not started until
    /// [`start_workers`](Self::start_workers) is called.
    ///
    /// Settings are validated first; see [`validate_settings`].
    pub fn new(settings: SchedulerSettings) -> Result<Self> {
        validate_settings(&settings)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(settings.event_capacity);
        let (snapshot_tx, snapshots) = watch::channel(SchedulerSnapshot {
            max_workers: settings.max_workers,
            ..SchedulerSnapshot::default()
        });

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .thread_name(WORKER_THREAD)
            .build()?;

        let core = CoreRuntime::new(
            Scheduler::new(settings.dependency_failure),
            settings.max_workers,
        );
        let options = RuntimeOptions {
            idle_timeout: settings.idle_timeout,
        };
        let loop_tx = tx.clone();
        let loop_events = events.clone();

        thread::Builder::new()
            .name(COORDINATOR_THREAD.to_string())
            .spawn(move || {
                rt.block_on(async move {
                    let pool = WorkerPool::new(loop_tx.clone());
                    let runtime =
                        Runtime::new(core, rx, loop_tx, pool, options, loop_events, snapshot_tx);
                    if let Err(err) = runtime.run().await {
                        error!(error = %err, "coordinator loop failed");
                    }
                });
                // Bodies still running after a non-waiting stop are abandoned.
                rt.shutdown_background();
                debug!("coordinator thread finished");
            })?;

        info!(
            max_workers = settings.max_workers,
            idle_timeout = ?settings.idle_timeout,
            policy = ?settings.dependency_failure,
            "coordinator created"
        );

        Ok(Self {
            tx,
            events,
            snapshots,
            settings,
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Submit one task or group.
    pub async fn add(&self, unit: impl Into<Unit>) -> Result<TaskId> {
        let unit = unit.into();
        let id = unit.id();
        self.add_many(vec![unit]).await?;
        Ok(id)
    }

    /// Submit a batch atomically: either every unit is accepted or none is.
    pub async fn add_many(&self, units: Vec<Unit>) -> Result<Vec<TaskId>> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Submit { units, reply })?;
        rx.await.map_err(|_| SchedulerError::ShuttingDown)?
    }

    /// Open a group scope. Tasks added to the scope become the group's
    /// children; nothing is submitted until [`GroupScope::commit`].
    pub fn create_group(&self, group: TaskGroupBuilder) -> GroupScope<'_> {
        GroupScope {
            coordinator: self,
            group,
            units: Vec::new(),
        }
    }

    /// Begin dispatching ready tasks.
    pub fn start_workers(&self) -> Result<()> {
        self.send(RuntimeEvent::StartWorkers)
    }

    /// Change the worker count. Shrinking lets busy workers finish their
    /// current task first; `0` pauses dispatching.
    pub fn resize_pool(&self, workers: usize) -> Result<()> {
        self.send(RuntimeEvent::Resize { workers })
    }

    /// Cancel unfinished work and shut the coordinator down.
    ///
    /// With `wait`, tasks already running finish and record their outcome
    /// before this resolves; without it they are marked `Cancelled` at once.
    pub async fn stop(&self, wait: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.send(RuntimeEvent::Stop { wait, reply }).is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    /// Cancel every unfinished unit and forget all units.
    pub async fn clear(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Clear { reply })?;
        rx.await.map_err(|_| SchedulerError::ShuttingDown)
    }

    /// Remove a unit, everything nested inside it and every unit that
    /// transitively waits for any of those. Returns the removed ids.
    ///
    /// Fails with [`SchedulerError::InvalidState`] if any of them is running.
    /// Each removed unit is announced as [`SchedulerEvent::TaskRemoved`], and
    /// its id may be submitted again afterwards.
    pub async fn remove(&self, id: TaskId) -> Result<Vec<TaskId>> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Remove { task: id, reply })?;
        rx.await.map_err(|_| SchedulerError::ShuttingDown)?
    }

    /// Run a `Failed` task again with a fresh retry budget, along with the
    /// dependents its failure skipped or failed. Returns the reset ids.
    pub async fn retry(&self, id: TaskId) -> Result<Vec<TaskId>> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Retry { task: id, reply })?;
        rx.await.map_err(|_| SchedulerError::ShuttingDown)?
    }

    /// Resolve once every task is terminal and nothing is executing.
    ///
    /// Never resolves while ready tasks wait for workers that were not
    /// started.
    pub async fn wait_idle(&self) -> Result<()> {
        let mut snapshots = self.snapshots.clone();
        snapshots
            .wait_for(SchedulerSnapshot::is_quiescent)
            .await
            .map_err(|_| SchedulerError::ShuttingDown)?;
        Ok(())
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.snapshots.borrow().get(id).cloned()
    }

    pub fn snapshot_all(&self) -> SchedulerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| SchedulerError::ShuttingDown)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let (reply, _) = oneshot::channel();
        let _ = self.tx.send(RuntimeEvent::Stop { wait: false, reply });
    }
}

/// Collects a group's members; see [`Coordinator::create_group`].
///
/// Dropping the scope without committing discards everything in it.
pub struct GroupScope<'a> {
    coordinator: &'a Coordinator,
    group: TaskGroupBuilder,
    units: Vec<Unit>,
}

impl GroupScope<'_> {
    /// Id the group will have once committed.
    pub fn id(&self) -> TaskId {
        self.group.id()
    }

    /// Add a task or nested group as a child of this group.
    pub fn add(&mut self, unit: impl Into<Unit>) -> TaskId {
        let unit = unit.into();
        let id = unit.id();
        self.units.push(unit);
        id
    }

    /// Submit the members and the group as one batch.
    pub async fn commit(self) -> Result<TaskId> {
        let children: Vec<TaskId> = self.units.iter().map(Unit::id).collect();
        let group = self.group.with_children(children).build()?;
        let id = group.id();

        let mut units = self.units;
        units.push(group.into());
        self.coordinator.add_many(units).await?;
        Ok(id)
    }
}
