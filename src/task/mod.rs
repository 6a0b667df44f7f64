// src/task/mod.rs

//! Task and group descriptors.
//!
//! - [`id`] defines [`TaskId`] (shared by tasks and groups) and [`Color`].
//! - [`state`] holds the [`TaskState`] machine.
//! - [`task`] / [`group`] define the immutable descriptors submitted to the
//!   coordinator, plus the [`TaskHandle`] passed to task bodies.
//! - [`builder`] provides the fluent builders that validate and produce them.
//! - [`callbacks`] maps lifecycle [`CallbackKind`]s to handlers.
//! - [`snapshot`] contains the read-only views handed to observers.

pub mod builder;
pub mod callbacks;
pub mod group;
pub mod id;
pub mod snapshot;
pub mod state;
#[allow(clippy::module_inception)]
pub mod task;

pub use builder::{TaskBuilder, TaskGroupBuilder};
pub use callbacks::{Callback, CallbackKind, TaskCallbacks};
pub use group::TaskGroup;
pub use id::{Color, TaskId};
pub use snapshot::{SchedulerSnapshot, StatusCounts, TaskSnapshot};
pub use state::TaskState;
pub use task::{Predicate, PredicatePoll, Task, TaskBody, TaskHandle};

/// Anything that can be submitted to the coordinator.
#[derive(Debug)]
pub enum Unit {
    Task(Task),
    Group(TaskGroup),
}

impl Unit {
    pub fn id(&self) -> TaskId {
        match self {
            Unit::Task(t) => t.id(),
            Unit::Group(g) => g.id(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Unit::Task(t) => t.label(),
            Unit::Group(g) => g.label(),
        }
    }
}

impl From<Task> for Unit {
    fn from(task: Task) -> Self {
        Unit::Task(task)
    }
}

impl From<TaskGroup> for Unit {
    fn from(group: TaskGroup) -> Self {
        Unit::Group(group)
    }
}
