// src/task/state.rs

//! Task lifecycle state machine.
//!
//! ```text
//! Pending  -> Ready      (all deps satisfied, predicate true)
//! Pending  -> Skipped    (predicate false, or a dependency failed under `skip`)
//! Pending  -> Failed     (a dependency failed under `fail`)
//! Ready    -> Running    (dispatched to a worker)
//! Running  -> Succeeded
//! Running  -> Failed
//! Failed   -> Retrying   (attempts remaining)
//! Retrying -> Ready
//! any non-terminal -> Cancelled
//! ```

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Skipped,
    Cancelled,
}

impl TaskState {
    /// Terminal states never change again.
    ///
    /// `Failed` is only observable at rest once the retry controller has
    /// declined to retry, so it is treated as terminal here.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Skipped | TaskState::Cancelled
        )
    }

    /// `Succeeded` or `Skipped`: satisfies downstream dependencies.
    pub fn is_success_compatible(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Skipped)
    }

    /// Terminal but not success-compatible: blocks dependents for good.
    pub fn is_hard_failure(self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Cancelled)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Ready) | (Pending, Skipped) | (Pending, Failed) => true,
            (Ready, Running) => true,
            (Running, Succeeded) | (Running, Failed) => true,
            (Failed, Retrying) => true,
            (Retrying, Ready) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Retrying => "retrying",
            TaskState::Skipped => "skipped",
            TaskState::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}
