// src/task/callbacks.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::snapshot::TaskSnapshot;

/// Lifecycle hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    /// First dispatch to a worker (groups: first child started).
    Start,
    /// Terminal outcome of any kind. Always last.
    Finished,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallbackKind::Start => "on_start",
            CallbackKind::Finished => "on_finished",
            CallbackKind::Completed => "on_completed",
            CallbackKind::Failed => "on_failed",
        };
        f.write_str(s)
    }
}

/// A lifecycle handler. Always invoked on the coordinator thread.
pub type Callback = Arc<dyn Fn(&TaskSnapshot) + Send + Sync>;

/// Registered handlers for one task or group.
#[derive(Clone, Default)]
pub struct TaskCallbacks {
    handlers: HashMap<CallbackKind, Callback>,
}

impl TaskCallbacks {
    pub fn set(&mut self, kind: CallbackKind, callback: Callback) {
        self.handlers.insert(kind, callback);
    }

    pub fn get(&self, kind: CallbackKind) -> Option<Callback> {
        self.handlers.get(&kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for TaskCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.handlers.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        f.debug_struct("TaskCallbacks")
            .field("registered", &kinds)
            .finish()
    }
}
