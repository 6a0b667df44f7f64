// src/task/snapshot.rs

//! Read-only views of scheduler state.
//!
//! Snapshots are plain immutable values: the coordinator publishes a new
//! [`SchedulerSnapshot`] after every event that changed something, and
//! callbacks get a [`TaskSnapshot`] of the unit they fire for. Units that did
//! not change share their `Arc` with the previous snapshot. Nothing in here
//! can mutate the scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::errors::TaskExecutionError;
use crate::types::UnitKind;

use super::id::{Color, TaskId};
use super::state::TaskState;

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    /// Submission order across the coordinator's lifetime.
    pub index: u64,
    pub kind: UnitKind,
    pub label: String,
    pub comment: String,
    pub color: Color,
    /// For groups, the derived aggregate state.
    pub state: TaskState,
    pub attempt_count: u32,
    pub max_retries: u32,
    pub progress: Option<f32>,
    pub error: Option<TaskExecutionError>,
    pub parent: Option<TaskId>,
    pub dependencies: Vec<TaskId>,
    pub children: Vec<TaskId>,
    /// Every state entered so far, oldest first. Empty for groups.
    pub history: Vec<TaskState>,
    pub data: BTreeMap<String, String>,
}

/// Number of *tasks* (groups excluded) per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Ready => self.ready += 1,
            TaskState::Running => self.running += 1,
            TaskState::Retrying => self.retrying += 1,
            TaskState::Succeeded => self.succeeded += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Skipped => self.skipped += 1,
            TaskState::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.ready
            + self.running
            + self.retrying
            + self.succeeded
            + self.failed
            + self.skipped
            + self.cancelled
    }

    pub fn unfinished(&self) -> usize {
        self.pending + self.ready + self.running + self.retrying
    }
}

/// Point-in-time copy of every unit known to the coordinator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerSnapshot {
    /// Units in submission order.
    pub units: Vec<Arc<TaskSnapshot>>,
    /// Task bodies currently executing (including cancelled ones whose
    /// completion has not arrived yet).
    pub in_flight: usize,
    pub max_workers: usize,
    pub workers_started: bool,
}

impl SchedulerSnapshot {
    pub fn get(&self, id: TaskId) -> Option<&TaskSnapshot> {
        self.units.iter().map(Arc::as_ref).find(|u| u.id == id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.units
            .iter()
            .map(Arc::as_ref)
            .filter(|u| u.kind == UnitKind::Task)
    }

    pub fn groups(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.units
            .iter()
            .map(Arc::as_ref)
            .filter(|u| u.kind == UnitKind::Group)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.tasks() {
            counts.record(task.state);
        }
        counts
    }

    /// No unfinished tasks and nothing executing.
    pub fn is_quiescent(&self) -> bool {
        self.in_flight == 0 && self.tasks().all(|t| t.state.is_terminal())
    }
}
