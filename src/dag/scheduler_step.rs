// src/dag/scheduler_step.rs

//! Step-by-step result types for the scheduler.

use std::fmt;
use std::time::Duration;

use crate::dag::task_info::ScheduledTask;
use crate::task::{Callback, CallbackKind, TaskId, TaskSnapshot};

/// A lifecycle callback the coordinator must deliver, in order.
#[derive(Clone)]
pub struct Notification {
    pub kind: CallbackKind,
    /// State of the unit at the moment the notification was produced.
    pub snapshot: TaskSnapshot,
    /// Registered handler, if any. Notifications without a handler are still
    /// produced so observers and tests can see the full lifecycle.
    pub callback: Option<Callback>,
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("kind", &self.kind)
            .field("unit", &self.snapshot.id)
            .field("label", &self.snapshot.label)
            .field("state", &self.snapshot.state)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// A retry that has to wait before the task is re-admitted to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayedRetry {
    pub task: TaskId,
    /// Dispatch token of the failed execution.
    pub dispatch: u64,
    pub delay: Duration,
}

/// A `false` predicate that gets another evaluation after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayedPredicate {
    pub task: TaskId,
    pub token: u64,
    pub delay: Duration,
}

/// Structured result of a single scheduler step.
///
/// Tests can drive the scheduler by hand and assert on exactly what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks moved `Ready -> Running` by this step, to be sent to workers.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Tasks that entered `Ready` during this step.
    pub newly_ready: Vec<TaskId>,
    /// Tasks that reached a terminal state during this step.
    pub newly_terminal: Vec<TaskId>,
    /// Callbacks to deliver, in order.
    pub notifications: Vec<Notification>,
    /// Retries the shell has to re-admit after a delay.
    pub delayed_retries: Vec<DelayedRetry>,
    /// Predicates the shell has to re-evaluate after a delay.
    pub delayed_predicates: Vec<DelayedPredicate>,
}

impl SchedulerStep {
    pub fn merge(&mut self, other: SchedulerStep) {
        self.newly_scheduled.extend(other.newly_scheduled);
        self.newly_ready.extend(other.newly_ready);
        self.newly_terminal.extend(other.newly_terminal);
        self.notifications.extend(other.notifications);
        self.delayed_retries.extend(other.delayed_retries);
        self.delayed_predicates.extend(other.delayed_predicates);
    }

    pub fn is_empty(&self) -> bool {
        self.newly_scheduled.is_empty()
            && self.newly_ready.is_empty()
            && self.newly_terminal.is_empty()
            && self.notifications.is_empty()
            && self.delayed_retries.is_empty()
            && self.delayed_predicates.is_empty()
    }
}
