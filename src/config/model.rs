// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::types::DependencyFailurePolicy;

/// Settings file as read from TOML.
///
/// ```toml
/// [scheduler]
/// max_workers = 8
/// idle_timeout = "1500ms"
/// on_dependency_failure = "skip"
/// event_capacity = 256
/// ```
///
/// Every key is optional; missing keys fall back to
/// [`SchedulerSettings::default`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSettingsFile {
    #[serde(default)]
    pub scheduler: RawSchedulerSection,
}

/// `[scheduler]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSchedulerSection {
    /// Number of workers once `start_workers` is called.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Duration string such as `"500ms"`, `"2s"` or `"1m"`.
    #[serde(default)]
    pub idle_timeout: Option<String>,

    /// `"skip"` (default) or `"fail"`.
    #[serde(default)]
    pub on_dependency_failure: Option<DependencyFailurePolicy>,

    /// Buffer of the observability broadcast channel.
    #[serde(default)]
    pub event_capacity: Option<usize>,
}

/// Validated settings injected into [`Coordinator::new`](crate::Coordinator::new).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub max_workers: usize,
    /// No dispatch for this long triggers the stall/idle check.
    pub idle_timeout: Duration,
    pub dependency_failure: DependencyFailurePolicy,
    pub event_capacity: usize,
}

pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            dependency_failure: DependencyFailurePolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SchedulerSettings {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_dependency_failure(mut self, policy: DependencyFailurePolicy) -> Self {
        self.dependency_failure = policy;
        self
    }

    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }
}
