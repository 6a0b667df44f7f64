// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of the pool directly.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production implementation in [`pool`](super::pool).
//!
//! - [`WorkerPool`](super::WorkerPool) is the implementation used by the
//!   coordinator.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which tasks were scheduled and directly emits `TaskCompleted` events.

use std::future::Future;
use std::pin::Pin;

use crate::dag::ScheduledTask;
use crate::errors::Result;

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Trait abstracting how scheduled tasks are executed.
///
/// Every task handed to `spawn_ready_tasks` must eventually produce exactly
/// one `RuntimeEvent::TaskCompleted` carrying the same dispatch token.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    fn spawn_ready_tasks(&mut self, tasks: Vec<ScheduledTask>) -> BackendFuture<'_>;

    /// Grow or shrink the number of workers.
    fn resize(&mut self, _workers: usize) -> BackendFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    /// Stop accepting work. With `wait`, resolve once every running body has
    /// returned.
    fn shutdown(&mut self, _wait: bool) -> BackendFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}
