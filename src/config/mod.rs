// src/config/mod.rs

//! Configuration loading and validation for taskq.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a settings file from disk and apply env overrides (`loader.rs`).
//! - Validate values and parse durations (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{apply_env_overrides, default_config_path, load_and_validate, load_from_path};
pub use model::{RawSchedulerSection, RawSettingsFile, SchedulerSettings};
pub use validate::{parse_duration, validate_settings};
