// src/dag/mod.rs

//! Dependency graph and scheduling.
//!
//! - [`graph`] holds the `waits_for` edges and group membership and rejects
//!   batches that would introduce a cycle.
//! - [`scheduler`] owns every task's mutable state and decides which tasks
//!   are ready to run.
//! - [`task_info`] provides per-unit entries and the dispatch record.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] applies state transitions and derives group states.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use graph::DependencyGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::{DelayedPredicate, DelayedRetry, Notification, SchedulerStep};
pub use state_manager::DependencyStatus;
pub use task_info::ScheduledTask;
