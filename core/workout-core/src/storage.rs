//! Storage configuration and path management.
//!
//! `StorageConfig` is the single place where on-disk locations are decided.
//! Production code uses `StorageConfig::default()` which points to `~/.workout/`
//! (or `$WORKOUT_HOME` when set). Tests use `StorageConfig::with_root(temp_dir)`.

use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the storage root.
pub const WORKOUT_HOME_ENV: &str = "WORKOUT_HOME";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        if let Some(root) = env::var_os(WORKOUT_HOME_ENV).filter(|v| !v.is_empty()) {
            return Self {
                root: PathBuf::from(root),
            };
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: home.join(".workout"),
        }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to config.toml (engine tuning).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to templates.json (workout template catalog).
    pub fn templates_file(&self) -> PathBuf {
        self.root.join("templates.json")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to store/ directory (one JSON file per durable key).
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Path to logs/ directory (rolling log files).
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_root() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/workout-test"));
        assert_eq!(config.root(), Path::new("/tmp/workout-test"));
        assert_eq!(
            config.store_dir(),
            PathBuf::from("/tmp/workout-test/store")
        );
        assert_eq!(
            config.config_file(),
            PathBuf::from("/tmp/workout-test/config.toml")
        );
        assert_eq!(
            config.templates_file(),
            PathBuf::from("/tmp/workout-test/templates.json")
        );
        assert_eq!(config.logs_dir(), PathBuf::from("/tmp/workout-test/logs"));
    }
}
