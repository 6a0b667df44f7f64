// src/lib.rs

//! Concurrent task scheduler.
//!
//! Build [`Task`]s and [`TaskGroup`]s with [`TaskBuilder`] /
//! [`TaskGroupBuilder`], submit them to a [`Coordinator`], and call
//! [`Coordinator::start_workers`]. Task bodies run on a bounded worker pool;
//! every state change and every callback happens on the coordinator thread.

pub mod cli;
pub mod config;
pub mod dag;
pub mod demo;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod task;
pub mod types;

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info};

pub use crate::config::SchedulerSettings;
pub use crate::engine::{
    Coordinator, DelayStrategy, GroupScope, RetryPolicy, SchedulerEvent, TaskOutcome,
};
pub use crate::errors::{SchedulerError, TaskExecutionError};
pub use crate::task::{
    CallbackKind, Color, SchedulerSnapshot, StatusCounts, Task, TaskBuilder, TaskGroup,
    TaskGroupBuilder, TaskHandle, TaskId, TaskSnapshot, TaskState, Unit,
};
pub use crate::types::DependencyFailurePolicy;

use crate::cli::CliArgs;
use crate::config::{apply_env_overrides, default_config_path, load_and_validate};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - settings (file → env → CLI flags)
/// - the coordinator
/// - the sample graph
/// - the final report
pub async fn run(args: CliArgs) -> Result<()> {
    let settings = resolve_settings(&args)?;
    info!(?settings, "resolved scheduler settings");

    let coordinator = Coordinator::new(settings)?;
    let ids = coordinator.add_many(demo::sample_graph(args.fail)?).await?;
    debug!(count = ids.len(), "sample graph submitted");

    coordinator.start_workers()?;
    coordinator.wait_idle().await?;

    let snapshot = coordinator.snapshot_all();
    coordinator.stop(true).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_report(&snapshot);
    }
    Ok(())
}

fn resolve_settings(args: &CliArgs) -> Result<SchedulerSettings> {
    let path = match &args.config {
        Some(p) => Some(PathBuf::from(p)),
        None => Some(default_config_path()).filter(|p| p.exists()),
    };

    let base = match path {
        Some(path) => {
            info!(path = %path.display(), "loading settings file");
            load_and_validate(&path)?
        }
        None => SchedulerSettings::default(),
    };

    let mut settings = apply_env_overrides(base, |key| std::env::var(key).ok())?;
    if let Some(workers) = args.workers {
        settings.max_workers = workers;
    }
    if let Some(policy) = args.on_dependency_failure {
        settings.dependency_failure = policy.into();
    }
    config::validate_settings(&settings)?;
    Ok(settings)
}

/// Plain-text table of every unit plus the per-state counts.
fn print_report(snapshot: &SchedulerSnapshot) {
    println!(
        "{:<14} {:<6} {:<10} {:>8} {:>9}  error",
        "unit", "kind", "state", "attempts", "progress"
    );
    for unit in &snapshot.units {
        let kind = match unit.kind {
            types::UnitKind::Task => "task",
            types::UnitKind::Group => "group",
        };
        let progress = unit
            .progress
            .map(|p| format!("{p:.0}%"))
            .unwrap_or_else(|| "-".to_string());
        let error = unit
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        println!(
            "{:<14} {:<6} {:<10} {:>8} {:>9}  {}",
            unit.label, kind, unit.state, unit.attempt_count, progress, error
        );
    }

    let counts = snapshot.counts();
    println!();
    println!(
        "succeeded={} failed={} skipped={} cancelled={} total={}",
        counts.succeeded,
        counts.failed,
        counts.skipped,
        counts.cancelled,
        counts.total()
    );
}
