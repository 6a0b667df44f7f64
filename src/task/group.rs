// src/task/group.rs

use std::collections::BTreeMap;

use super::callbacks::TaskCallbacks;
use super::id::{Color, TaskId};

/// Composite node grouping tasks and nested groups.
///
/// A group has no body and no stored state: its state is derived from its
/// children every time it is asked for. Children are kept in insertion order
/// for display; order has no effect on scheduling.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    pub(crate) id: TaskId,
    pub(crate) label: String,
    pub(crate) comment: String,
    pub(crate) color: Color,
    pub(crate) children: Vec<TaskId>,
    pub(crate) callbacks: TaskCallbacks,
    pub(crate) data: BTreeMap<String, String>,
}

impl TaskGroup {
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

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }
}
