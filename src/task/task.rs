// src/task/task.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::RuntimeEvent;
use crate::engine::retry::RetryPolicy;

use super::callbacks::TaskCallbacks;
use super::id::{Color, TaskId};

/// Body of a task. Runs on a worker thread and may block.
pub type TaskBody = Arc<dyn Fn(&TaskHandle) -> anyhow::Result<()> + Send + Sync>;

/// Readiness predicate, evaluated on the coordinator thread when all
/// dependencies are satisfied. `false` skips the task.
pub type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// How often a `false` predicate is re-evaluated before the task is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredicatePoll {
    /// Re-evaluations after the first `false`.
    pub retries: u32,
    /// Wait between two evaluations.
    pub interval: Duration,
}

/// Immutable task descriptor produced by [`TaskBuilder`](super::TaskBuilder).
///
/// Topology (dependencies), body and callbacks never change after `build()`;
/// mutable state (state, attempts, progress) is owned by the scheduler.
#[derive(Clone)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) label: String,
    pub(crate) comment: String,
    pub(crate) color: Color,
    pub(crate) body: TaskBody,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) predicate: Option<Predicate>,
    pub(crate) predicate_poll: Option<PredicatePoll>,
    pub(crate) retry: RetryPolicy,
    pub(crate) callbacks: TaskCallbacks,
    pub(crate) data: BTreeMap<String, String>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    pub fn predicate_poll(&self) -> Option<PredicatePoll> {
        self.predicate_poll
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("dependencies", &self.dependencies)
            .field("predicate", &self.predicate.is_some())
            .field("predicate_poll", &self.predicate_poll)
            .field("retry", &self.retry)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

/// Handle passed to a running task body.
///
/// Gives the body its identity and lets it log and report progress back to
/// the coordinator without touching scheduler state.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    label: String,
    attempt: u32,
    dispatch: u64,
    events: Option<mpsc::UnboundedSender<RuntimeEvent>>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        label: String,
        attempt: u32,
        dispatch: u64,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        Self {
            id,
            label,
            attempt,
            dispatch,
            events: Some(events),
        }
    }

    /// A handle that is not connected to any coordinator (progress reports
    /// are dropped). Useful for fake executors and unit tests.
    pub fn detached(id: TaskId, label: impl Into<String>, attempt: u32) -> Self {
        Self {
            id,
            label: label.into(),
            attempt,
            dispatch: 0,
            events: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 1-based execution attempt this body is running as.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Log a user-facing message attributed to this task.
    pub fn log(&self, message: impl fmt::Display) {
        info!(target: "taskq::task", task = %self.id, label = %self.label, "{message}");
    }

    /// Report progress in percent; clamped to `0.0..=100.0`.
    pub fn report_progress(&self, value: f32) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 100.0) };

        let Some(events) = &self.events else {
            return;
        };

        let sent = events.send(RuntimeEvent::TaskProgressed {
            task: self.id,
            dispatch: self.dispatch,
            value,
        });

        if sent.is_err() {
            debug!(task = %self.id, "coordinator gone; dropping progress report");
        }
    }
}
