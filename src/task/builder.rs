// src/task/builder.rs

//! Fluent builders for [`Task`] and [`TaskGroup`].
//!
//! Builders are plain value accumulators: setters consume and return `self`,
//! and `build()` consumes the builder, so a built descriptor can never be
//! mutated through it again. The id is allocated up front so that other
//! builders can reference a unit (`wait_for(builder.id())`) before it is built.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::retry::RetryPolicy;
use crate::errors::{Result, SchedulerError};

use super::callbacks::{CallbackKind, TaskCallbacks};
use super::group::TaskGroup;
use super::id::{Color, TaskId};
use super::snapshot::TaskSnapshot;
use super::task::{Predicate, PredicatePoll, Task, TaskBody, TaskHandle};

/// Setters shared by both builders (label, comment, color, data, callbacks).
macro_rules! common_setters {
    () => {
        /// Id the built unit will carry.
        pub fn id(&self) -> TaskId {
            self.id
        }

        pub fn with_label(mut self, label: impl Into<String>) -> Self {
            self.label = label.into();
            self
        }

        pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
            self.comment = comment.into();
            self
        }

        pub fn with_color(mut self, color: Color) -> Self {
            self.color = color;
            self
        }

        /// Attach a free-form key/value pair.
        pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.data.insert(key.into(), value.into());
            self
        }

        pub fn on_start<F>(self, f: F) -> Self
        where
            F: Fn(&TaskSnapshot) + Send + Sync + 'static,
        {
            self.on(CallbackKind::Start, f)
        }

        pub fn on_finished<F>(self, f: F) -> Self
        where
            F: Fn(&TaskSnapshot) + Send + Sync + 'static,
        {
            self.on(CallbackKind::Finished, f)
        }

        pub fn on_completed<F>(self, f: F) -> Self
        where
            F: Fn(&TaskSnapshot) + Send + Sync + 'static,
        {
            self.on(CallbackKind::Completed, f)
        }

        pub fn on_failed<F>(self, f: F) -> Self
        where
            F: Fn(&TaskSnapshot) + Send + Sync + 'static,
        {
            self.on(CallbackKind::Failed, f)
        }

        /// Register a handler for an arbitrary callback kind.
        pub fn on<F>(mut self, kind: CallbackKind, f: F) -> Self
        where
            F: Fn(&TaskSnapshot) + Send + Sync + 'static,
        {
            self.callbacks.set(kind, Arc::new(f));
            self
        }
    };
}

/// Builder for a single [`Task`].
///
/// ```
/// use taskq::TaskBuilder;
///
/// let fetch = TaskBuilder::new("fetch")
///     .with_body(|task| {
///         task.log("fetching");
///         Ok(())
///     })
///     .build()
///     .unwrap();
///
/// let parse = TaskBuilder::new("parse")
///     .with_body(|_| Ok(()))
///     .wait_for(fetch.id())
///     .build()
///     .unwrap();
///
/// assert_eq!(parse.dependencies(), &[fetch.id()]);
/// ```
pub struct TaskBuilder {
    id: TaskId,
    label: String,
    comment: String,
    color: Color,
    body: Option<TaskBody>,
    dependencies: Vec<TaskId>,
    predicate: Option<Predicate>,
    predicate_poll: Option<PredicatePoll>,
    retry: RetryPolicy,
    callbacks: TaskCallbacks,
    data: BTreeMap<String, String>,
}

impl TaskBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            label: label.into(),
            comment: String::new(),
            color: Color::default(),
            body: None,
            dependencies: Vec::new(),
            predicate: None,
            predicate_poll: None,
            retry: RetryPolicy::none(),
            callbacks: TaskCallbacks::default(),
            data: BTreeMap::new(),
        }
    }

    common_setters!();

    /// Set the execution body. The handle gives access to the task's id,
    /// attempt number, logging and progress reporting.
    pub fn with_body<F>(mut self, body: F) -> Self
    where
        F: Fn(&TaskHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    /// Wait for another task or group to reach `Succeeded`/`Skipped`.
    pub fn wait_for(mut self, target: TaskId) -> Self {
        self.dependencies.push(target);
        self
    }

    pub fn wait_for_all(mut self, targets: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(targets);
        self
    }

    /// Skip the task instead of running it if `predicate` returns `false`
    /// once its dependencies are satisfied.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Re-evaluate a `false` predicate up to `retries` more times, `interval`
    /// apart, before giving up and skipping the task. The task stays
    /// `Pending` meanwhile.
    pub fn with_predicate_polling(mut self, retries: u32, interval: Duration) -> Self {
        self.predicate_poll = Some(PredicatePoll { retries, interval });
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Shorthand for an immediate retry policy with `max_retries` retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry = RetryPolicy::immediate(max_retries);
        self
    }

    /// Validate and produce the task in `Pending` state.
    ///
    /// Fails with [`SchedulerError::Configuration`] if no body was set or the
    /// retry policy is malformed, and with [`SchedulerError::CyclicDependency`]
    /// if the task waits for itself.
    pub fn build(self) -> Result<Task> {
        let body = self.body.ok_or_else(|| {
            SchedulerError::config(format!("task '{}' has no body", self.label))
        })?;

        if self.dependencies.contains(&self.id) {
            return Err(SchedulerError::CyclicDependency(format!(
                "task '{}' cannot wait for itself",
                self.label
            )));
        }

        self.retry.validate().map_err(|msg| {
            SchedulerError::config(format!("task '{}': {msg}", self.label))
        })?;

        if let Some(poll) = self.predicate_poll {
            if self.predicate.is_none() {
                return Err(SchedulerError::config(format!(
                    "task '{}' sets predicate polling without a predicate",
                    self.label
                )));
            }
            if poll.retries > 0 && poll.interval.is_zero() {
                return Err(SchedulerError::config(format!(
                    "task '{}': predicate poll interval must be positive",
                    self.label
                )));
            }
        }

        let mut seen = HashSet::new();
        let dependencies = self
            .dependencies
            .into_iter()
            .filter(|d| seen.insert(*d))
            .collect();

        Ok(Task {
            id: self.id,
            label: self.label,
            comment: self.comment,
            color: self.color,
            body,
            dependencies,
            predicate: self.predicate,
            predicate_poll: self.predicate_poll,
            retry: self.retry,
            callbacks: self.callbacks,
            data: self.data,
        })
    }
}

/// Builder for a [`TaskGroup`].
pub struct TaskGroupBuilder {
    id: TaskId,
    label: String,
    comment: String,
    color: Color,
    children: Vec<TaskId>,
    callbacks: TaskCallbacks,
    data: BTreeMap<String, String>,
}

impl TaskGroupBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            label: label.into(),
            comment: String::new(),
            color: Color::default(),
            children: Vec::new(),
            callbacks: TaskCallbacks::default(),
            data: BTreeMap::new(),
        }
    }

    common_setters!();

    pub fn with_child(mut self, child: TaskId) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = TaskId>) -> Self {
        self.children.extend(children);
        self
    }

    /// Validate and produce the group. Children must be distinct.
    pub fn build(self) -> Result<TaskGroup> {
        let mut seen = HashSet::new();
        for child in &self.children {
            if !seen.insert(*child) {
                return Err(SchedulerError::config(format!(
                    "group '{}' lists child {} more than once",
                    self.label, child
                )));
            }
        }

        Ok(TaskGroup {
            id: self.id,
            label: self.label,
            comment: self.comment,
            color: self.color,
            children: self.children,
            callbacks: self.callbacks,
            data: self.data,
        })
    }
}
