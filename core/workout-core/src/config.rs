//! Engine configuration loaded from `config.toml`.
//!
//! A missing file yields defaults. Every field carries a serde default, so a
//! partial file only overrides what it names:
//!
//! ```toml
//! [recovery]
//! orphan_age_hours = 24
//! retry_delay_ms = 1000
//!
//! [rest_timer]
//! warning_threshold_secs = 10
//! ```

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Deserialize;

use crate::error::{Result, WorkoutError};

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub rest_timer: RestTimerConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// A live session older than this since `started_at` is orphaned.
    pub orphan_age_hours: i64,
    /// A live session not updated for this long is orphaned.
    pub stale_update_hours: i64,
    /// Foregrounding without a background marker after this long flags a crash.
    pub crash_window_secs: i64,
    pub heartbeat_interval_secs: u64,
    /// History entries older than this are pruned at start-up regardless of tier.
    pub history_floor_days: i64,
    pub marker_ttl_days: i64,
    pub max_persist_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            orphan_age_hours: 24,
            stale_update_hours: 2,
            crash_window_secs: 3600,
            heartbeat_interval_secs: 30,
            history_floor_days: 90,
            marker_ttl_days: 7,
            max_persist_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl RecoveryConfig {
    pub fn orphan_age(&self) -> Duration {
        span(Duration::try_hours(self.orphan_age_hours))
    }

    pub fn stale_update(&self) -> Duration {
        span(Duration::try_hours(self.stale_update_hours))
    }

    pub fn crash_window(&self) -> Duration {
        span(Duration::try_seconds(self.crash_window_secs))
    }

    pub fn history_floor(&self) -> Duration {
        span(Duration::try_days(self.history_floor_days))
    }

    pub fn marker_ttl(&self) -> Duration {
        span(Duration::try_days(self.marker_ttl_days))
    }

    /// Never shorter than one second.
    pub fn heartbeat_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn retry_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.retry_delay_ms)
    }

    fn validate(&self, problems: &mut Vec<String>) {
        check("recovery.orphan_age_hours", self.orphan_age_hours, 1, MAX_SPAN_DAYS * 24, problems);
        check("recovery.stale_update_hours", self.stale_update_hours, 1, MAX_SPAN_DAYS * 24, problems);
        check("recovery.crash_window_secs", self.crash_window_secs, 1, MAX_SPAN_DAYS * 86_400, problems);
        check("recovery.heartbeat_interval_secs", self.heartbeat_interval_secs, 1, 86_400, problems);
        check("recovery.history_floor_days", self.history_floor_days, 1, MAX_SPAN_DAYS, problems);
        check("recovery.marker_ttl_days", self.marker_ttl_days, 1, MAX_SPAN_DAYS, problems);
        check("recovery.max_persist_attempts", self.max_persist_attempts, 1, 100, problems);
        check("recovery.retry_delay_ms", self.retry_delay_ms, 0, 60_000, problems);
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RestTimerConfig {
    pub tick_interval_ms: u64,
    pub warning_threshold_secs: u32,
    /// Used when the exercise has no `target_rest_time`.
    pub default_rest_secs: u32,
}

impl Default for RestTimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            warning_threshold_secs: 10,
            default_rest_secs: 90,
        }
    }
}

impl RestTimerConfig {
    /// Never shorter than one millisecond.
    pub fn tick_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.tick_interval_ms.max(1))
    }

    fn validate(&self, problems: &mut Vec<String>) {
        check("rest_timer.tick_interval_ms", self.tick_interval_ms, 1, 60_000, problems);
        check("rest_timer.default_rest_secs", self.default_rest_secs, 1, 86_400, problems);
    }
}

/// Upper bound for any configured time span.
const MAX_SPAN_DAYS: i128 = 36_500;

/// Out-of-range spans saturate instead of panicking in date arithmetic.
fn span(delta: Option<Duration>) -> Duration {
    delta.unwrap_or(Duration::MAX)
}

fn check<T: Into<i128>>(name: &str, value: T, min: i128, max: i128, problems: &mut Vec<String>) {
    let value = value.into();
    if value < min || value > max {
        problems.push(format!("{} = {} (expected {}..={})", name, value, min, max));
    }
}

impl EngineConfig {
    /// Rejects zero intervals and spans too large for date arithmetic.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut problems = Vec::new();
        self.recovery.validate(&mut problems);
        self.rest_timer.validate(&mut problems);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

/// Loads the engine configuration, returning defaults when the file does not exist.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| WorkoutError::Io {
        context: format!("reading config {}", path.display()),
        source,
    })?;
    let config =
        toml::from_str::<EngineConfig>(&content).map_err(|err| WorkoutError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;
    config
        .validate()
        .map_err(|details| WorkoutError::ConfigMalformed {
            path: path.to_path_buf(),
            details,
        })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_engine_config(&temp_dir.path().join("missing.toml")).expect("load");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.recovery.max_persist_attempts, 3);
        assert_eq!(config.rest_timer.warning_threshold_secs, 10);
    }

    #[test]
    fn partial_file_overrides_named_fields() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[recovery]
orphan_age_hours = 12
retry_delay_ms = 5

[rest_timer]
default_rest_secs = 120
"#,
        )
        .expect("write config");

        let config = load_engine_config(&path).expect("load");
        assert_eq!(config.recovery.orphan_age_hours, 12);
        assert_eq!(config.recovery.retry_delay(), StdDuration::from_millis(5));
        assert_eq!(config.recovery.stale_update_hours, 2);
        assert_eq!(config.rest_timer.default_rest_secs, 120);
        assert_eq!(config.rest_timer.tick_interval_ms, 1000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[recovery\norphan_age_hours = ").expect("write config");

        let err = load_engine_config(&path).unwrap_err();
        assert!(matches!(err, WorkoutError::ConfigMalformed { .. }));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[recovery]
history_floor_days = 1000000000
heartbeat_interval_secs = 0

[rest_timer]
tick_interval_ms = 0
"#,
        )
        .expect("write config");

        match load_engine_config(&path).unwrap_err() {
            WorkoutError::ConfigMalformed { details, .. } => {
                assert!(details.contains("history_floor_days"), "{}", details);
                assert!(details.contains("heartbeat_interval_secs"), "{}", details);
                assert!(details.contains("tick_interval_ms"), "{}", details);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn defaults_pass_validation() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn oversized_spans_saturate() {
        let config = RecoveryConfig {
            history_floor_days: i64::MAX,
            heartbeat_interval_secs: 0,
            ..RecoveryConfig::default()
        };
        assert_eq!(config.history_floor(), Duration::MAX);
        assert_eq!(config.heartbeat_interval(), StdDuration::from_secs(1));
    }
}
