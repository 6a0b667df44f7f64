// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes coordinator requests and worker events and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels and answering requests
//! - invoking user callbacks
//! - sending `ScheduledTask`s to the worker pool
//! - running retry and predicate timers
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, threads, or task bodies.

use tracing::{info, warn};

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    CoreCommand, CoreStep, PoolState, handle_clear, handle_predicate_due, handle_remove,
    handle_resize, handle_retry, handle_retry_due, handle_start_workers, handle_stop,
    handle_submit, handle_task_completion,
};
use crate::engine::{SchedulerEvent, TaskOutcome};
use crate::errors::Result;
use crate::task::{SchedulerSnapshot, StatusCounts, TaskId, Unit};

/// Pure core runtime state.
///
/// This owns:
/// - the scheduler
/// - the dispatch gate (worker count, in-flight bodies, started/stopping)
/// - bookkeeping for observability events
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    pool: PoolState,
    last_counts: StatusCounts,
    stall_reported: bool,
    idle_reported: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, max_workers: usize) -> Self {
        let last_counts = scheduler.status_counts();
        Self {
            scheduler,
            pool: PoolState::new(max_workers),
            last_counts,
            stall_reported: false,
            idle_reported: false,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight
    }

    pub fn max_workers(&self) -> usize {
        self.pool.max_workers
    }

    pub fn is_started(&self) -> bool {
        self.pool.started
    }

    pub fn is_stopping(&self) -> bool {
        self.pool.stopping
    }

    pub fn submit(&mut self, units: Vec<Unit>) -> (Result<Vec<TaskId>>, CoreStep) {
        let (result, step) = handle_submit(&mut self.scheduler, &mut self.pool, units);
        if result.is_ok() {
            self.idle_reported = false;
            self.stall_reported = false;
        }
        (result, self.finish(step))
    }

    pub fn start_workers(&mut self) -> CoreStep {
        let step = handle_start_workers(&mut self.scheduler, &mut self.pool);
        self.finish(step)
    }

    pub fn resize(&mut self, workers: usize) -> CoreStep {
        let step = handle_resize(&mut self.scheduler, &mut self.pool, workers);
        self.stall_reported = false;
        self.finish(step)
    }

    pub fn complete(&mut self, task: TaskId, dispatch: u64, outcome: TaskOutcome) -> CoreStep {
        let step =
            handle_task_completion(&mut self.scheduler, &mut self.pool, task, dispatch, outcome);
        self.finish(step)
    }

    /// Record progress. Produces no commands; the value shows up in the next
    /// snapshot.
    pub fn progress(&mut self, task: TaskId, dispatch: u64, value: f32) -> CoreStep {
        self.scheduler.progress(task, dispatch, value);
        CoreStep::running(Vec::new())
    }

    pub fn retry_due(&mut self, task: TaskId, dispatch: u64) -> CoreStep {
        let step = handle_retry_due(&mut self.scheduler, &mut self.pool, task, dispatch);
        self.finish(step)
    }

    pub fn predicate_due(&mut self, task: TaskId, token: u64) -> CoreStep {
        let step = handle_predicate_due(&mut self.scheduler, &mut self.pool, task, token);
        self.finish(step)
    }

    pub fn remove(&mut self, task: TaskId) -> (Result<Vec<TaskId>>, CoreStep) {
        let (result, step) = handle_remove(&mut self.scheduler, &mut self.pool, task);
        if result.is_ok() {
            self.idle_reported = false;
            self.stall_reported = false;
        }
        (result, self.finish(step))
    }

    pub fn retry(&mut self, task: TaskId) -> (Result<Vec<TaskId>>, CoreStep) {
        let (result, step) = handle_retry(&mut self.scheduler, &mut self.pool, task);
        if result.is_ok() {
            self.idle_reported = false;
            self.stall_reported = false;
        }
        (result, self.finish(step))
    }

    pub fn stop(&mut self, wait: bool) -> CoreStep {
        let step = handle_stop(&mut self.scheduler, &mut self.pool, wait);
        self.finish(step)
    }

    pub fn clear(&mut self) -> CoreStep {
        let step = handle_clear(&mut self.scheduler);
        self.idle_reported = false;
        self.stall_reported = false;
        self.finish(step)
    }

    /// Called by the shell when no task has been dispatched for the idle
    /// timeout.
    ///
    /// Emits `DeadlockWarning` once per stall if unfinished tasks can make no
    /// progress, or `Idle` once everything is terminal.
    pub fn idle_tick(&mut self) -> CoreStep {
        let mut commands = Vec::new();

        if !self.pool.started || self.pool.stopping || self.pool.in_flight > 0 {
            return CoreStep::running(commands);
        }

        if self.scheduler.has_unfinished() {
            let mut pending = self.scheduler.pending_tasks();
            pending.extend(self.scheduler.ready_set());

            if !self.stall_reported && !pending.is_empty() {
                warn!(
                    pending = pending.len(),
                    max_workers = self.pool.max_workers,
                    "no task started within idle timeout while tasks remain pending"
                );
                self.stall_reported = true;
                commands.push(CoreCommand::Emit(SchedulerEvent::DeadlockWarning { pending }));
            }
        } else if !self.idle_reported {
            info!("all tasks finished; coordinator idle");
            self.idle_reported = true;
            commands.push(CoreCommand::Emit(SchedulerEvent::Idle));
        }

        CoreStep::running(commands)
    }

    /// Changes whenever [`snapshot`](Self::snapshot) would return something
    /// different from the last call.
    pub fn snapshot_version(&self) -> (u64, usize, usize, bool) {
        (
            self.scheduler.revision(),
            self.pool.in_flight,
            self.pool.max_workers,
            self.pool.started,
        )
    }

    /// Read-only copy of every unit plus pool bookkeeping.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            units: self.scheduler.snapshot_all(),
            in_flight: self.pool.in_flight,
            max_workers: self.pool.max_workers,
            workers_started: self.pool.started,
        }
    }

    /// Append a `StatusChanged` event if the per-state counts moved, and
    /// clear the stall flag once something was dispatched.
    fn finish(&mut self, mut step: CoreStep) -> CoreStep {
        if step
            .commands
            .iter()
            .any(|c| matches!(c, CoreCommand::Dispatch(_)))
        {
            self.stall_reported = false;
        }

        let counts = self.scheduler.status_counts();
        if counts != self.last_counts {
            self.last_counts = counts;
            step.commands
                .push(CoreCommand::Emit(SchedulerEvent::StatusChanged(counts)));
        }
        step
    }
}
