// src/engine/mod.rs

//! Coordination engine.
//!
//! This module ties together:
//! - the scheduler (task state, readiness, retries)
//! - the worker pool that executes task bodies
//! - the single-threaded event loop that reacts to:
//!   - submissions and control requests from [`Coordinator`] handles
//!   - task completion and progress events from workers
//!   - delayed retry and predicate timers
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; [`coordinator`] is the public handle that owns
//! the coordinator thread.

use tokio::sync::oneshot;

use crate::errors::{Result, TaskExecutionError};
use crate::task::{CallbackKind, StatusCounts, TaskId, Unit};

/// Outcome of one execution of a task body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(TaskExecutionError),
}

/// Events flowing into the coordinator loop from handles, workers and timers.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// Add a batch of tasks and groups atomically.
    Submit {
        units: Vec<Unit>,
        reply: oneshot::Sender<Result<Vec<TaskId>>>,
    },
    /// Begin dispatching ready tasks to the pool.
    StartWorkers,
    /// Change the number of workers.
    Resize { workers: usize },
    /// Cancel unfinished work and shut the loop down.
    ///
    /// With `wait`, tasks already executing finish and record their outcome
    /// first; otherwise they are cancelled immediately.
    Stop {
        wait: bool,
        reply: oneshot::Sender<()>,
    },
    /// Cancel everything and forget every unit.
    Clear { reply: oneshot::Sender<()> },
    /// Remove a unit and everything that depends on it.
    Remove {
        task: TaskId,
        reply: oneshot::Sender<Result<Vec<TaskId>>>,
    },
    /// Run a failed task again, together with its blocked dependents.
    Retry {
        task: TaskId,
        reply: oneshot::Sender<Result<Vec<TaskId>>>,
    },
    /// A worker finished one execution. `dispatch` identifies the execution.
    TaskCompleted {
        task: TaskId,
        dispatch: u64,
        outcome: TaskOutcome,
    },
    /// A running task reported progress (0..=100).
    TaskProgressed {
        task: TaskId,
        dispatch: u64,
        value: f32,
    },
    /// The back-off timer of a delayed retry elapsed.
    RetryDue { task: TaskId, dispatch: u64 },
    /// A predicate timer elapsed.
    PredicateDue { task: TaskId, token: u64 },
}

/// Observability events broadcast to [`Coordinator::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// Units accepted by a submission.
    TaskAdded { task: TaskId },
    /// Units dropped by a removal.
    TaskRemoved { task: TaskId },
    /// Per-state task counts changed.
    StatusChanged(StatusCounts),
    /// Nothing has started within the idle timeout although tasks are still
    /// pending; their dependencies can never be met with the current pool.
    DeadlockWarning { pending: Vec<TaskId> },
    /// Every task is terminal and nothing is executing.
    Idle,
    /// A user callback panicked; the loop carried on.
    CallbackPanicked { task: TaskId, kind: CallbackKind },
}

pub mod coordinator;
pub mod core;
pub mod event_handlers;
pub mod retry;
pub mod runtime;

pub use coordinator::{Coordinator, GroupScope};
pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use retry::{DelayStrategy, RetryController, RetryDecision, RetryPolicy};
pub use runtime::Runtime;
