// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info, warn};

use crate::dag::{DelayedPredicate, DelayedRetry, Notification, ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::{SchedulerEvent, TaskOutcome};
use crate::errors::{Result, SchedulerError};
use crate::task::{TaskId, Unit};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Invoke these user callbacks, in order, on the coordinator thread.
    Notify(Vec<Notification>),
    /// Send these tasks to the worker pool.
    Dispatch(Vec<ScheduledTask>),
    /// Start a back-off timer that posts `RetryDue` when it fires.
    ScheduleRetry(DelayedRetry),
    /// Start a timer that posts `PredicateDue` when it fires.
    SchedulePredicate(DelayedPredicate),
    /// Grow or shrink the worker pool.
    ResizePool(usize),
    /// Broadcast an observability event.
    Emit(SchedulerEvent),
    /// Stop the worker pool.
    ShutdownPool { wait: bool },
}

/// Decision returned by the core after handling a single event.
#[derive(Debug)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub(crate) fn running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Dispatch-gate bookkeeping owned by the core.
#[derive(Debug, Clone)]
pub(crate) struct PoolState {
    pub max_workers: usize,
    /// Bodies handed to the pool whose completion has not arrived yet.
    pub in_flight: usize,
    pub started: bool,
    pub stopping: bool,
    /// Keep running until in-flight bodies report back.
    pub drain: bool,
}

impl PoolState {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            in_flight: 0,
            started: false,
            stopping: false,
            drain: false,
        }
    }

    fn free_slots(&self) -> usize {
        if !self.started || self.stopping {
            return 0;
        }
        self.max_workers.saturating_sub(self.in_flight)
    }
}

/// Turn a scheduler step into commands: callbacks first, then timers.
pub(crate) fn absorb(step: SchedulerStep, commands: &mut Vec<CoreCommand>) {
    if !step.notifications.is_empty() {
        commands.push(CoreCommand::Notify(step.notifications));
    }
    for retry in step.delayed_retries {
        commands.push(CoreCommand::ScheduleRetry(retry));
    }
    for predicate in step.delayed_predicates {
        commands.push(CoreCommand::SchedulePredicate(predicate));
    }
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::Dispatch(step.newly_scheduled));
    }
}

/// Fill free worker slots from the ready queue.
///
/// Returns the number of tasks handed out.
pub(crate) fn try_dispatch(
    scheduler: &mut Scheduler,
    pool: &mut PoolState,
    commands: &mut Vec<CoreCommand>,
) -> usize {
    let free = pool.free_slots();
    if free == 0 {
        return 0;
    }

    let step = scheduler.dispatch(free);
    let count = step.newly_scheduled.len();
    pool.in_flight += count;
    absorb(step, commands);
    count
}

pub(crate) fn handle_submit(
    scheduler: &mut Scheduler,
    pool: &mut PoolState,
    units: Vec<Unit>,
) -> (Result<Vec<TaskId>>, CoreStep) {
    let mut commands = Vec::new();

    if pool.stopping {
        return (Err(SchedulerError::ShuttingDown), CoreStep::running(commands));
    }

    let ids: Vec<TaskId> = units.iter().map(Unit::id).collect();
    match scheduler.submit(units) {
        Ok(step) => {
            info!(count = ids.len(), "accepted submission");
            absorb(step, &mut commands);
            commands.extend(
                ids.iter()
                    .map(|id| CoreCommand::Emit(SchedulerEvent::TaskAdded { task: *id })),
            );
            try_dispatch(scheduler, pool, &mut commands);
            (Ok(ids), CoreStep::running(commands))
        }
        Err(err) => {
            warn!(error = %err, "rejected submission");
            (Err(err), CoreStep::running(commands))
        }
    }
}

pub(crate) fn handle_start_workers(scheduler: &mut Scheduler, pool: &mut PoolState) -> CoreStep {
    let mut commands = Vec::new();

    if pool.started || pool.stopping {
        debug!("start_workers called again; ignoring");
        return CoreStep::running(commands);
    }

    pool.started = true;
    info!(workers = pool.max_workers, "starting workers");
    commands.push(CoreCommand::ResizePool(pool.max_workers));
    try_dispatch(scheduler, pool, &mut commands);
    CoreStep::running(commands)
}

pub(crate) fn handle_resize(
    scheduler: &mut Scheduler,
    pool: &mut PoolState,
    workers: usize,
) -> CoreStep {
    let mut commands = Vec::new();

    info!(from = pool.max_workers, to = workers, "resizing worker pool");
    pool.max_workers = workers;
    if pool.started && !pool.stopping {
        commands.push(CoreCommand::ResizePool(workers));
        try_dispatch(scheduler, pool, &mut commands);
    }
    CoreStep::running(commands)
}

pub(crate) fn handle_task_completion(
    scheduler: &mut Scheduler,
    pool: &mut PoolState,
    task: TaskId,
    dispatch: u64,
    outcome: TaskOutcome,
) -> CoreStep {
    let mut commands = Vec::new();

    pool.in_flight = pool.in_flight.saturating_sub(1);

    if pool.stopping {
        // A failure while draining is final.
        absorb(
            scheduler.complete_without_retry(task, dispatch, outcome),
            &mut commands,
        );
        // Newly ready dependents must not start during shutdown.
        absorb(scheduler.cancel_unstarted(), &mut commands);
        return finish_stop_if_drained(pool, commands);
    }

    absorb(scheduler.complete(task, dispatch, outcome), &mut commands);
    try_dispatch(scheduler, pool, &mut commands);
    CoreStep::running(commands)
}

pub(crate) fn handle_retry_due(
    scheduler: &mut Scheduler,
    pool: &mut PoolState,
    task: TaskId,
    dispatch: u64,
) -> CoreStep {
    let mut commands = Vec::new();
    absorb(scheduler.retry_due(task, dispatch), &mut commands);
    try_dispatch(scheduler, pool, &mut commands);
    CoreStep::running(commands)
}

pub(crate) fn handle_predicate_due(
    scheduler: &mut Scheduler,
    pool: &mut PoolState,
    task: TaskId,
    token: u64,
) -> CoreStep {
    let mut commands = Vec::new();
    absorb(scheduler.predicate_due(task, token), &mut commands);
    try_dispatch(scheduler, pool, &mut commands);
    CoreStep::running(commands)
}

pub(crate) fn handle_remove(
    scheduler: &mut Scheduler,
    pool: &mut PoolState,
    task: TaskId,
) -> (Result<Vec<TaskId>>, CoreStep) {
    let mut commands = Vec::new();

    if pool.stopping {
        return (Err(SchedulerError::ShuttingDown), CoreStep::running(commands));
    }

    match scheduler.remove(task) {
        Ok((removed, step)) => {
            absorb(step, &mut commands);
            commands.extend(
                removed
                    .iter()
                    .map(|id| CoreCommand::Emit(SchedulerEvent::TaskRemoved { task: *id })),
            );
            try_dispatch(scheduler, pool, &mut commands);
            (Ok(removed), CoreStep::running(commands))
        }
        Err(err) => {
            warn!(task = %task, error = %err, "rejected removal");
            (Err(err), CoreStep::running(commands))
        }
    }
}

pub(crate) fn handle_retry(
    scheduler: &mut Scheduler,
    pool: &mut PoolState,
    task: TaskId,
) -> (Result<Vec<TaskId>>, CoreStep) {
    let mut commands = Vec::new();

    if pool.stopping {
        return (Err(SchedulerError::ShuttingDown), CoreStep::running(commands));
    }

    match scheduler.retry(task) {
        Ok((reset, step)) => {
            absorb(step, &mut commands);
            try_dispatch(scheduler, pool, &mut commands);
            (Ok(reset), CoreStep::running(commands))
        }
        Err(err) => {
            warn!(task = %task, error = %err, "rejected retry");
            (Err(err), CoreStep::running(commands))
        }
    }
}

pub(crate) fn handle_stop(scheduler: &mut Scheduler, pool: &mut PoolState, wait: bool) -> CoreStep {
    let mut commands = Vec::new();

    info!(wait, in_flight = pool.in_flight, "stop requested");
    pool.stopping = true;
    pool.drain = wait;

    let step = if wait {
        scheduler.cancel_unstarted()
    } else {
        scheduler.cancel_all()
    };
    absorb(step, &mut commands);

    finish_stop_if_drained(pool, commands)
}

fn finish_stop_if_drained(pool: &PoolState, mut commands: Vec<CoreCommand>) -> CoreStep {
    if pool.drain && pool.in_flight > 0 {
        debug!(in_flight = pool.in_flight, "waiting for running tasks before stopping");
        return CoreStep::running(commands);
    }

    commands.push(CoreCommand::ShutdownPool { wait: pool.drain });
    CoreStep {
        commands,
        keep_running: false,
    }
}

pub(crate) fn handle_clear(scheduler: &mut Scheduler) -> CoreStep {
    let mut commands = Vec::new();
    absorb(scheduler.clear(), &mut commands);
    CoreStep::running(commands)
}
