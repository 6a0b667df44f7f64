// tests/settings_file.rs

use std::error::Error;
use std::fs;
use std::time::Duration;

use tempfile::tempdir;

use taskq::config::{apply_env_overrides, load_and_validate};
use taskq::{DependencyFailurePolicy, SchedulerError, SchedulerSettings};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn settings_file_is_loaded_and_validated() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("taskq.toml");
    fs::write(
        &path,
        r#"
[scheduler]
max_workers = 2
idle_timeout = "250ms"
on_dependency_failure = "fail"
"#,
    )?;

    let settings = load_and_validate(&path)?;
    assert_eq!(settings.max_workers, 2);
    assert_eq!(settings.idle_timeout, Duration::from_millis(250));
    assert_eq!(settings.dependency_failure, DependencyFailurePolicy::Fail);
    assert_eq!(
        settings.event_capacity,
        SchedulerSettings::default().event_capacity
    );
    Ok(())
}

#[test]
fn env_overrides_win_over_file_values() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("taskq.toml");
    fs::write(&path, "[scheduler]\nmax_workers = 2\n")?;

    let settings = apply_env_overrides(load_and_validate(&path)?, |key| match key {
        "TASKQ_MAX_WORKERS" => Some("8".to_string()),
        "TASKQ_IDLE_TIMEOUT" => Some("2s".to_string()),
        _ => None,
    })?;

    assert_eq!(settings.max_workers, 8);
    assert_eq!(settings.idle_timeout, Duration::from_secs(2));
    Ok(())
}

#[test]
fn zero_workers_in_file_is_rejected() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("taskq.toml");
    fs::write(&path, "[scheduler]\nmax_workers = 0\n")?;

    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, SchedulerError::Configuration(_)));
    Ok(())
}

#[test]
fn malformed_file_reports_toml_error() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("taskq.toml");
    fs::write(&path, "[scheduler\nmax_workers = ")?;

    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, SchedulerError::Toml(_)));
    Ok(())
}
