//! Configuration types for the presence host.

use crate::error::{PresenceError, Result};
use crate::lifecycle::window::SleepWindow;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fixed timezone used for cron evaluation, the sleep window and
/// human-readable times unless configured otherwise.
pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Lifecycle timing and sleep window.
    pub lifecycle: LifecycleConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Database location.
    pub storage: StorageConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Start of the daily sleep window (`HH:MM`, inclusive).
    pub sleep_start: String,
    /// End of the daily sleep window (`HH:MM`, exclusive).
    pub sleep_end: String,
    /// Mean delay between promotion attempts while awake and not watching.
    pub promotion_mean_interval_ms: u64,
    /// Activity digest period while watching.
    pub activity_tick_interval_ms: u64,
    /// How often the sleep window is re-evaluated.
    pub sleep_check_interval_ms: u64,
    /// Lower bound for the digest lookback.
    pub activity_min_lookback_minutes: i64,
    /// Focus channel used when promotion finds no unread activity.
    pub default_focus_channel: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            sleep_start: "02:30".to_owned(),
            sleep_end: "10:30".to_owned(),
            promotion_mean_interval_ms: 2 * 60 * 60 * 1000,
            activity_tick_interval_ms: 5 * 60 * 1000,
            sleep_check_interval_ms: 60 * 1000,
            activity_min_lookback_minutes: 5,
            default_focus_channel: "default".to_owned(),
        }
    }
}

impl LifecycleConfig {
    pub fn sleep_window(&self) -> Result<SleepWindow> {
        SleepWindow::parse(&self.sleep_start, &self.sleep_end)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// IANA timezone name.
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_owned(),
        }
    }
}

impl SchedulerConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| PresenceError::Config(format!("unknown timezone '{}': {e}", self.timezone)))
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("presence.db"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rotated log files. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            log_dir: None,
        }
    }
}

/// Application data directory.
///
/// Resolves to `dirs::data_dir()/presence/`. Override with the
/// `PRESENCE_DATA_DIR` environment variable.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PRESENCE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("presence"))
        .unwrap_or_else(|| PathBuf::from("/tmp/presence-data"))
}

impl PresenceConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PresenceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PresenceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/presence/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("presence").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("presence")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/presence-config/config.toml")
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.lifecycle.sleep_window()?;
        self.scheduler.tz()?;

        let periods = [
            ("promotion_mean_interval_ms", self.lifecycle.promotion_mean_interval_ms),
            ("activity_tick_interval_ms", self.lifecycle.activity_tick_interval_ms),
            ("sleep_check_interval_ms", self.lifecycle.sleep_check_interval_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(PresenceError::Config(format!("{name} must be positive")));
            }
        }
        if self.lifecycle.activity_min_lookback_minutes <= 0 {
            return Err(PresenceError::Config(
                "activity_min_lookback_minutes must be positive".to_owned(),
            ));
        }
        if self.lifecycle.default_focus_channel.trim().is_empty() {
            return Err(PresenceError::Config(
                "default_focus_channel must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PresenceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lifecycle.sleep_start, "02:30");
        assert_eq!(config.lifecycle.sleep_end, "10:30");
        assert_eq!(config.lifecycle.promotion_mean_interval_ms, 7_200_000);
        assert_eq!(config.lifecycle.activity_tick_interval_ms, 300_000);
        assert_eq!(config.scheduler.tz().unwrap(), chrono_tz::Asia::Tokyo);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = PresenceConfig::default();
        config.lifecycle.sleep_start = "23:00".to_owned();
        config.scheduler.timezone = "Europe/Berlin".to_owned();
        config.logging.log_dir = Some(dir.path().join("logs"));

        config.save_to_file(&path).unwrap();
        let loaded = PresenceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.lifecycle.sleep_start, "23:00");
        assert_eq!(loaded.scheduler.timezone, "Europe/Berlin");
        assert_eq!(loaded.logging.log_dir, Some(dir.path().join("logs")));
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[lifecycle]\nsleep_end = \"07:00\"\n").unwrap();

        let loaded = PresenceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.lifecycle.sleep_end, "07:00");
        assert_eq!(loaded.lifecycle.sleep_start, "02:30");
        assert_eq!(loaded.scheduler.timezone, DEFAULT_TIMEZONE);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = PresenceConfig::from_file(std::path::Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "lifecycle = [").unwrap();
        assert!(matches!(
            PresenceConfig::from_file(&path),
            Err(PresenceError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = PresenceConfig::default();
        config.lifecycle.sleep_start = "25:00".to_owned();
        assert!(config.validate().is_err());

        let mut config = PresenceConfig::default();
        config.scheduler.timezone = "Mars/Olympus".to_owned();
        assert!(config.validate().is_err());

        let mut config = PresenceConfig::default();
        config.lifecycle.activity_tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = PresenceConfig::default();
        config.lifecycle.default_focus_channel = " ".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_db_lives_in_data_dir() {
        let config = StorageConfig::default();
        assert!(config.db_path.ends_with("presence.db"));
        assert_eq!(config.db_path.parent(), Some(default_data_dir().as_path()));
    }

    #[test]
    fn default_config_path_ends_with_app_dir() {
        let path = PresenceConfig::default_config_path();
        assert!(path.ends_with("presence/config.toml"));
    }
}
