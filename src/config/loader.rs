// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawSettingsFile, SchedulerSettings};
use crate::config::validate::{parse_duration, validate_settings};
use crate::errors::{Result, SchedulerError};

pub const ENV_MAX_WORKERS: &str = "TASKQ_MAX_WORKERS";
pub const ENV_IDLE_TIMEOUT: &str = "TASKQ_IDLE_TIMEOUT";

/// Load a settings file from a given path and return the raw `RawSettingsFile`.
///
/// This only performs TOML deserialization; it does **not** validate values.
/// Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawSettingsFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawSettingsFile = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a settings file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults for missing keys.
/// - Parses `idle_timeout` and checks value ranges.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<SchedulerSettings> {
    let raw = load_from_path(&path)?;
    SchedulerSettings::try_from(raw)
}

/// Default settings path: `taskq.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("taskq.toml")
}

impl SchedulerSettings {
    /// Defaults overridden by `TASKQ_MAX_WORKERS` / `TASKQ_IDLE_TIMEOUT`.
    pub fn from_env() -> Result<Self> {
        apply_env_overrides(SchedulerSettings::default(), |key| std::env::var(key).ok())
    }
}

/// Override `settings` with values from `lookup` (normally the process
/// environment).
///
/// `TASKQ_IDLE_TIMEOUT` accepts a duration string or bare milliseconds.
pub fn apply_env_overrides<F>(mut settings: SchedulerSettings, lookup: F) -> Result<SchedulerSettings>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_MAX_WORKERS) {
        settings.max_workers = value.trim().parse().map_err(|e| {
            SchedulerError::config(format!("{ENV_MAX_WORKERS}='{value}': {e}"))
        })?;
    }

    if let Some(value) = lookup(ENV_IDLE_TIMEOUT) {
        let trimmed = value.trim();
        settings.idle_timeout = match trimmed.parse::<u64>() {
            Ok(ms) => std::time::Duration::from_millis(ms),
            Err(_) => parse_duration(trimmed)
                .map_err(|e| SchedulerError::config(format!("{ENV_IDLE_TIMEOUT}: {e}")))?,
        };
    }

    validate_settings(&settings)?;
    Ok(settings)
}
