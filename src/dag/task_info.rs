// src/dag/task_info.rs

//! Per-unit scheduler entries and the dispatch record handed to workers.

use std::collections::HashSet;
use std::fmt;

use crate::errors::TaskExecutionError;
use crate::task::{CallbackKind, Task, TaskBody, TaskGroup, TaskId, TaskState};

/// Immutable task descriptor plus the mutable state the scheduler owns.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub task: Task,
    /// Submission order.
    pub index: u64,
    pub state: TaskState,
    /// Executions started so far.
    pub attempts: u32,
    /// Every state entered, oldest first.
    pub history: Vec<TaskState>,
    pub error: Option<TaskExecutionError>,
    pub progress: Option<f32>,
    /// Callbacks already delivered; each kind fires at most once.
    pub fired: HashSet<CallbackKind>,
    /// Token of the current execution. Completions, progress reports and
    /// retry timers carrying any other token are stale.
    pub dispatch: u64,
    /// Predicate re-evaluations still allowed after a `false`.
    pub predicate_polls_left: u32,
    /// Token of the predicate timer this task is waiting for, if any.
    pub predicate_wait: Option<u64>,
}

impl TaskEntry {
    pub fn new(task: Task, index: u64) -> Self {
        let predicate_polls_left = task.predicate_poll.map_or(0, |p| p.retries);
        Self {
            task,
            index,
            state: TaskState::Pending,
            attempts: 0,
            history: vec![TaskState::Pending],
            error: None,
            progress: None,
            fired: HashSet::new(),
            dispatch: 0,
            predicate_polls_left,
            predicate_wait: None,
        }
    }

    /// Forget the outcome of earlier runs so the task can be scheduled again.
    /// History is kept.
    pub fn reset(&mut self) {
        self.state = TaskState::Pending;
        self.history.push(TaskState::Pending);
        self.attempts = 0;
        self.error = None;
        self.progress = None;
        self.fired.clear();
        self.predicate_polls_left = self.task.predicate_poll.map_or(0, |p| p.retries);
        self.predicate_wait = None;
    }
}

/// Group descriptor. State is derived from the children on demand; only the
/// callback bookkeeping is stored.
#[derive(Debug)]
pub(crate) struct GroupEntry {
    pub group: TaskGroup,
    pub index: u64,
    pub fired: HashSet<CallbackKind>,
}

impl GroupEntry {
    pub fn new(group: TaskGroup, index: u64) -> Self {
        Self {
            group,
            index,
            fired: HashSet::new(),
        }
    }
}

/// Description of a task the coordinator wants a worker to run now.
#[derive(Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub label: String,
    /// 1-based attempt number, as seen by the body.
    pub attempt: u32,
    /// Unique per dispatch, across clears and manual retries. Completions
    /// are matched on this, not on the attempt.
    pub dispatch: u64,
    pub body: TaskBody,
}

impl ScheduledTask {
    pub(crate) fn from_entry(entry: &TaskEntry) -> Self {
        Self {
            id: entry.task.id,
            label: entry.task.label.clone(),
            attempt: entry.attempts,
            dispatch: entry.dispatch,
            body: entry.task.body.clone(),
        }
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("attempt", &self.attempt)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}
