use std::str::FromStr;

use serde::Deserialize;

/// What happens to a task when one of its dependencies ends in a terminal,
/// non-success state (`Failed` or `Cancelled`).
///
/// - `Skip`: the dependent is marked `Skipped` without running (default).
/// - `Fail`: the dependent is marked `Failed` with
///   [`TaskExecutionError::DependencyFailed`](crate::errors::TaskExecutionError)
///   and its `on_failed` callback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyFailurePolicy {
    #[default]
    Skip,
    Fail,
}

impl FromStr for DependencyFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(DependencyFailurePolicy::Skip),
            "fail" => Ok(DependencyFailurePolicy::Fail),
            other => Err(format!(
                "invalid on_dependency_failure: {other} (expected \"skip\" or \"fail\")"
            )),
        }
    }
}

/// Kind of schedulable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Task,
    Group,
}
