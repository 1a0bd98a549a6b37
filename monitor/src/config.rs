//! Configuration management for the hostwatch monitor
//!
//! Configuration is read once at startup from a TOML file, then selected
//! fields may be overridden from `HOSTWATCH_*` environment variables. The
//! result is validated and treated as immutable for the life of the process.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::sample::MetricKind;
use crate::thresholds::{Direction, ThresholdConfig};

/// Longest poll interval: the report window must fit inside one day
pub const MAX_POLL_INTERVAL_MINUTES: u64 = 24 * 60;

/// Main configuration structure for the monitor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Polling loop configuration
    pub monitor: GeneralConfig,

    /// Daily digest configuration
    pub report: ReportConfig,

    /// Warning and critical bounds
    pub thresholds: ThresholdConfig,

    /// Watched processes
    pub processes: ProcessConfig,

    /// Database liveness check
    pub database: DatabaseConfig,

    /// Recipients and transport
    pub notifications: NotificationConfig,

    /// Log archive and watched mount points
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Polling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Name used in notification subjects
    pub server_name: String,

    /// Minutes between cycles
    pub poll_interval_minutes: u64,

    /// Seconds to wait between the two CPU counter readings
    pub cpu_settle_secs: u64,
}

/// Daily digest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Send the daily digest
    pub enabled: bool,

    /// Local hour (0-23) after which the digest goes out
    pub hour: u32,

    /// Remove a process's daily log once it has been summarized
    pub delete_process_logs_after_summary: bool,
}

/// Watched processes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Patterns matched against process names and command lines
    pub watch: Vec<String>,
}

/// Database liveness check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Probe the database every cycle
    pub enabled: bool,

    /// host:port to connect to
    pub address: String,

    /// Name used in notification lines
    pub label: String,

    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

/// Notification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Recipients of threshold, process and error notifications
    pub warning_recipients: Vec<String>,

    /// Recipients of the daily digest
    pub digest_recipients: Vec<String>,

    /// SMTP transport
    pub smtp: SmtpConfig,
}

/// SMTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Deliver through SMTP; when false notifications are only logged
    pub enabled: bool,

    /// Relay hostname
    pub host: String,

    /// Relay port (STARTTLS)
    pub port: u16,

    /// Login user
    pub username: Option<String>,

    /// Login password, usually supplied through HOSTWATCH_SMTP_PASSWORD
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// RFC 5322 "From" address
    pub from_address: String,

    /// Upper bound on a single delivery, in seconds
    pub timeout_secs: u64,
}

/// Storage related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding stats_log.csv and per-process logs
    pub archive_dir: PathBuf,

    /// Mount point whose free space is watched
    pub root_path: PathBuf,

    /// Boot partition mount point
    pub boot_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log file path; console only when unset
    pub file_path: Option<PathBuf>,

    /// Emit JSON lines
    pub json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            server_name: "SERVER_NAME".to_string(),
            poll_interval_minutes: 15,
            cpu_settle_secs: 3,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 2,
            delete_process_logs_after_summary: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:27017".to_string(),
            label: "MongoDB".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from_address: "hostwatch@localhost".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("./log"),
            root_path: PathBuf::from("/"),
            boot_path: PathBuf::from("/boot"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json: false,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.to_string_lossy().to_string() })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
    }

    /// Override fields from environment variables
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(server_name) = std::env::var("HOSTWATCH_SERVER_NAME") {
            self.monitor.server_name = server_name;
        }

        if let Ok(minutes) = std::env::var("HOSTWATCH_POLL_MINUTES") {
            self.monitor.poll_interval_minutes = minutes.parse()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "HOSTWATCH_POLL_MINUTES".to_string(),
                    value: minutes,
                })?;
        }

        if let Ok(hour) = std::env::var("HOSTWATCH_REPORT_HOUR") {
            self.report.hour = hour.parse()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "HOSTWATCH_REPORT_HOUR".to_string(),
                    value: hour,
                })?;
        }

        if let Ok(archive_dir) = std::env::var("HOSTWATCH_ARCHIVE_DIR") {
            self.storage.archive_dir = PathBuf::from(archive_dir);
        }

        if let Ok(level) = std::env::var("HOSTWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(password) = std::env::var("HOSTWATCH_SMTP_PASSWORD") {
            self.notifications.smtp.password = Some(password);
        }

        Ok(())
    }

    /// Load configuration with fallback order: file -> defaults, then env
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default_config_path()?;
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let poll = self.monitor.poll_interval_minutes;
        if poll == 0 || poll > MAX_POLL_INTERVAL_MINUTES {
            return Err(ConfigError::InvalidValue {
                field: "monitor.poll_interval_minutes".to_string(),
                value: poll.to_string(),
            });
        }

        if self.report.hour > 23 {
            return Err(ConfigError::InvalidValue {
                field: "report.hour".to_string(),
                value: self.report.hour.to_string(),
            });
        }

        for kind in MetricKind::ALL {
            let bound = self.thresholds.bound(kind);
            if !bound.is_ordered(Direction::for_metric(kind)) {
                return Err(ConfigError::ValidationFailed {
                    reason: format!(
                        "{} critical bound {} does not lie beyond warning bound {}",
                        kind, bound.critical, bound.warning
                    ),
                });
            }
        }

        let mut seen = HashSet::new();
        for name in &self.processes.watch {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "processes.watch".to_string(),
                    value: format!("{:?}", name),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::ValidationFailed {
                    reason: format!("process {} is listed twice", name),
                });
            }
        }

        if self.database.enabled && !self.database.address.contains(':') {
            return Err(ConfigError::InvalidValue {
                field: "database.address".to_string(),
                value: self.database.address.clone(),
            });
        }

        if self.notifications.smtp.enabled && self.notifications.warning_recipients.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "SMTP is enabled but notifications.warning_recipients is empty".to_string(),
            });
        }

        if self.notifications.smtp.enabled
            && self.report.enabled
            && self.notifications.digest_recipients.is_empty()
        {
            return Err(ConfigError::ValidationFailed {
                reason: "daily report is enabled but notifications.digest_recipients is empty".to_string(),
            });
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("hostwatch").join("hostwatch.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|_| ConfigError::ValidationFailed {
                    reason: format!("Unable to create config directory: {}", parent.display()),
                })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content)
            .map_err(|_| ConfigError::PermissionDenied { path: path.to_string_lossy().to_string() })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::Bound;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor.poll_interval_minutes, 15);
        assert_eq!(config.thresholds.cpu, Bound::new(80, 90));
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();

        config.monitor.poll_interval_minutes = 0;
        assert!(config.validate().is_err());

        config.monitor.poll_interval_minutes = u64::MAX / 30;
        assert!(config.validate().is_err());

        config.monitor.poll_interval_minutes = MAX_POLL_INTERVAL_MINUTES;
        assert!(config.validate().is_ok());

        config.monitor.poll_interval_minutes = 15;
        config.report.hour = 24;
        assert!(config.validate().is_err());

        config.report.hour = 2;
        config.thresholds.disk_free_gb = Bound::new(100, 180);
        assert!(config.validate().is_err());

        config.thresholds.disk_free_gb = Bound::new(180, 100);
        config.processes.watch = vec!["worker".to_string(), "worker".to_string()];
        assert!(config.validate().is_err());

        config.processes.watch = vec!["worker".to_string()];
        config.notifications.smtp.enabled = true;
        assert!(config.validate().is_err());

        config.notifications.warning_recipients = vec!["ops@example.com".to_string()];
        config.notifications.digest_recipients = vec!["team@example.com".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = MonitorConfig::from_toml_str(
            r#"
[monitor]
server_name = "db01"

[thresholds.cpu]
warning = 75
critical = 95

[processes]
watch = ["mongod", "collector.py"]
"#,
        )
        .unwrap();

        assert_eq!(config.monitor.server_name, "db01");
        assert_eq!(config.monitor.poll_interval_minutes, 15);
        assert_eq!(config.thresholds.cpu, Bound::new(75, 95));
        assert_eq!(config.thresholds.ram, Bound::new(70, 80));
        assert_eq!(config.processes.watch.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = MonitorConfig::from_toml_str("[monitor\nserver_name = 1");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = MonitorConfig::default();
        config.monitor.server_name = "web02".to_string();
        config.notifications.smtp.password = Some("secret".to_string());
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let saved = fs::read_to_string(temp_file.path()).unwrap();
        assert!(!saved.contains("secret"));

        let loaded = MonitorConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.monitor.server_name, "web02");
        assert_eq!(loaded.thresholds, config.thresholds);
        assert_eq!(loaded.notifications.smtp.password, None);
    }

    #[test]
    fn test_missing_file() {
        let result = MonitorConfig::from_file("/nonexistent/hostwatch.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }
}
