// src/cli.rs

//! CLI argument parsing for the `taskq` demo binary.

use clap::{Parser, ValueEnum};

use crate::types::DependencyFailurePolicy;

/// Command-line arguments for `taskq`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskq",
    version,
    about = "Run a sample task graph on the taskq scheduler and print the outcome.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a settings file (TOML, `[scheduler]` table).
    ///
    /// If omitted, `taskq.toml` is used when it exists.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Number of workers; overrides the settings file and `TASKQ_MAX_WORKERS`.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// What happens to dependents of a failed task.
    #[arg(long, value_enum, value_name = "POLICY")]
    pub on_dependency_failure: Option<PolicyArg>,

    /// Make one of the compile steps fail permanently.
    #[arg(long)]
    pub fail: bool,

    /// Print the final snapshot as JSON instead of a table.
    #[arg(long)]
    pub json: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKQ_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum PolicyArg {
    Skip,
    Fail,
}

impl From<PolicyArg> for DependencyFailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Skip => DependencyFailurePolicy::Skip,
            PolicyArg::Fail => DependencyFailurePolicy::Fail,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
