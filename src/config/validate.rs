// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{RawSettingsFile, SchedulerSettings};
use crate::errors::{Result, SchedulerError};

impl TryFrom<RawSettingsFile> for SchedulerSettings {
    type Error = SchedulerError;

    fn try_from(raw: RawSettingsFile) -> std::result::Result<Self, Self::Error> {
        let defaults = SchedulerSettings::default();
        let section = raw.scheduler;

        let idle_timeout = match section.idle_timeout.as_deref() {
            Some(s) => parse_duration(s).map_err(|e| {
                SchedulerError::config(format!("[scheduler].idle_timeout: {e}"))
            })?,
            None => defaults.idle_timeout,
        };

        let settings = SchedulerSettings {
            max_workers: section.max_workers.unwrap_or(defaults.max_workers),
            idle_timeout,
            dependency_failure: section
                .on_dependency_failure
                .unwrap_or(defaults.dependency_failure),
            event_capacity: section.event_capacity.unwrap_or(defaults.event_capacity),
        };

        validate_settings(&settings)?;
        Ok(settings)
    }
}

/// Shortest idle timeout accepted; the coordinator loop wakes up this often
/// at most.
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(1);

/// Check value ranges. Called for file-based, env-based and programmatic
/// settings alike.
pub fn validate_settings(settings: &SchedulerSettings) -> Result<()> {
    if settings.idle_timeout < MIN_IDLE_TIMEOUT {
        return Err(SchedulerError::config(format!(
            "[scheduler].idle_timeout must be >= 1ms (got {:?})",
            settings.idle_timeout
        )));
    }

    if settings.max_workers == 0 {
        return Err(SchedulerError::config(
            "[scheduler].max_workers must be >= 1 (got 0)",
        ));
    }

    if settings.event_capacity == 0 {
        return Err(SchedulerError::config(
            "[scheduler].event_capacity must be >= 1 (got 0)",
        ));
    }

    Ok(())
}

/// Parse `"250ms"`, `"2s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;
    let unit = unit_part.trim().to_lowercase();

    let seconds_per = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{unit}'; expected ms, s, m, or h"
            ));
        }
    };

    value
        .checked_mul(seconds_per)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawSchedulerSection;
    use crate::types::DependencyFailurePolicy;

    #[test]
    fn parses_duration_suffixes() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 2s "), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration("3m"), Ok(Duration::from_secs(180)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("100").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5 days").is_err());
    }

    #[test]
    fn oversized_durations_are_errors_not_panics() {
        let err = parse_duration("307445734561825861m").unwrap_err();
        assert!(err.contains("too large"));
        assert!(parse_duration("5124095576030432h").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn zero_idle_timeout_is_rejected() {
        let raw = RawSettingsFile {
            scheduler: RawSchedulerSection {
                idle_timeout: Some("0ms".into()),
                ..RawSchedulerSection::default()
            },
        };
        assert!(matches!(
            SchedulerSettings::try_from(raw),
            Err(SchedulerError::Configuration(_))
        ));

        let settings = SchedulerSettings::default().with_idle_timeout(Duration::ZERO);
        assert!(validate_settings(&settings).is_err());
        let settings = SchedulerSettings::default().with_idle_timeout(MIN_IDLE_TIMEOUT);
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn empty_file_yields_defaults() {
        let settings = SchedulerSettings::try_from(RawSettingsFile::default()).unwrap();
        assert_eq!(settings, SchedulerSettings::default());
    }

    #[test]
    fn section_values_override_defaults() {
        let raw = RawSettingsFile {
            scheduler: RawSchedulerSection {
                max_workers: Some(9),
                idle_timeout: Some("1500ms".into()),
                on_dependency_failure: Some(DependencyFailurePolicy::Fail),
                event_capacity: None,
            },
        };
        let settings = SchedulerSettings::try_from(raw).unwrap();
        assert_eq!(settings.max_workers, 9);
        assert_eq!(settings.idle_timeout, Duration::from_millis(1500));
        assert_eq!(settings.dependency_failure, DependencyFailurePolicy::Fail);
        assert_eq!(settings.event_capacity, 256);
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let raw = RawSettingsFile {
            scheduler: RawSchedulerSection {
                max_workers: Some(0),
                ..RawSchedulerSection::default()
            },
        };
        assert!(matches!(
            SchedulerSettings::try_from(raw),
            Err(SchedulerError::Configuration(_))
        ));
    }
}
