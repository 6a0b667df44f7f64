// src/errors.rs

//! Crate-wide error types.
//!
//! [`SchedulerError`] covers everything a caller of the coordinator API can
//! get back synchronously. Failures of task bodies are *not* errors in that
//! sense: they are captured as [`TaskExecutionError`] values and only ever
//! surface through task state, snapshots and `on_failed` callbacks.

use thiserror::Error;

use crate::task::TaskId;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cyclic dependency: {0}")]
    CyclicDependency(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// The unit exists but the request does not apply to its current state,
    /// such as removing a running task or retrying one that did not fail.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedulerError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SchedulerError::Configuration(msg.into())
    }
}

/// Why a task execution failed.
///
/// Produced on a worker and shipped to the coordinator as plain data inside a
/// completion record.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum TaskExecutionError {
    /// The task body returned an error.
    #[error("{0}")]
    Body(String),

    /// The task body panicked.
    #[error("task body panicked: {0}")]
    Panicked(String),

    /// The worker could not run the body to completion.
    #[error("task execution aborted")]
    Aborted,

    /// A hard dependency failed terminally (only with the `fail` policy).
    #[error("dependency {0} failed")]
    DependencyFailed(TaskId),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedulerError>;
