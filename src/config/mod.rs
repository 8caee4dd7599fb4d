//! Service configuration loaded from TOML files
//!
//! All operational tunables live here: device endpoint, connection retry
//! policy, the daily sync window, and scheduler intervals. Every field has a
//! built-in default so the service runs with no config file at all.
//!
//! ## Loading Order
//!
//! 1. `CLOCKSMITH_CONFIG` environment variable (path to TOML file)
//! 2. `clocksmith.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Raw TOML structs are deserialized first, then [`ServiceConfig::validate`]
//! produces the typed configs the components consume. Hard invariant
//! violations (inverted window, zero retry budget) are fatal; suspicious but
//! workable orderings are logged as warnings and accepted.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Fatal configuration error. Warnings never take this path.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid time for {field}: {value} (expected HH:MM)")]
    InvalidTime { field: &'static str, value: String },

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// ============================================================================
// Raw TOML Sections
// ============================================================================

/// Root configuration as it appears on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Terminal endpoint and credentials
    #[serde(default)]
    pub device: DeviceSection,

    /// Connection retry and health-probe policy
    #[serde(default)]
    pub connection: ConnectionSection,

    /// Daily sync window and randomization bounds
    #[serde(default)]
    pub window: WindowSection,

    /// Scheduler loop intervals and restart policy
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            device: DeviceSection::default(),
            connection: ConnectionSection::default(),
            window: WindowSection::default(),
            scheduler: SchedulerSection::default(),
        }
    }
}

/// `[device]`: which terminal to manage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    pub address: String,
    pub port: u16,
    pub user: String,
    pub secret: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            address: "192.168.1.100".to_string(),
            port: 4370,
            user: "admin".to_string(),
            secret: String::new(),
        }
    }
}

/// `[connection]`: retry/backoff and device-level health probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSection {
    /// Maximum connect attempts before giving up (>= 1)
    pub max_retry_attempts: u32,
    /// Base for exponential backoff between attempts, in seconds (>= 1)
    pub retry_backoff_base: u32,
    /// Per-attempt connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Interval between connection health probes in seconds
    pub health_check_interval_secs: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            retry_backoff_base: 2,
            connect_timeout_secs: 10,
            health_check_interval_secs: 30,
        }
    }
}

/// `[window]`: daily service window, target randomization, and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSection {
    /// Window opening, "HH:MM"
    pub window_start: String,
    /// Window closing, "HH:MM" (inclusive)
    pub window_end: String,
    /// Lower bound of the randomized target time-of-day, "HH:MM"
    pub random_min: String,
    /// Upper bound of the randomized target time-of-day, "HH:MM" (inclusive)
    pub random_max: String,
    /// Boundary after which no new writes are issued; the tail of the window
    /// is wait-only so an already-written value is not redundantly replaced
    pub cutoff: String,
    /// Minimum seconds between writes
    pub min_interval_seconds: u64,
    /// Maximum seconds between writes
    pub max_interval_seconds: u64,
    /// Fraction of the base interval used as jitter range (0.0–1.0)
    pub jitter_factor: f64,
    /// Consecutive write failures before the cooldown pause kicks in
    pub max_failures_before_pause: u32,
    /// Cooldown pause duration in seconds
    pub failure_pause_duration_secs: u64,
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            window_start: "07:50".to_string(),
            window_end: "08:10".to_string(),
            random_min: "07:55".to_string(),
            random_max: "07:59".to_string(),
            cutoff: "08:00".to_string(),
            min_interval_seconds: 30,
            max_interval_seconds: 90,
            jitter_factor: 0.1,
            max_failures_before_pause: 3,
            failure_pause_duration_secs: 300,
        }
    }
}

/// `[scheduler]`: coordination loop intervals and restart policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Interval between scheduler-level health reports in seconds
    pub health_check_interval_secs: u64,
    /// Interval between metrics snapshots in seconds
    pub metrics_collection_interval_secs: u64,
    /// Whether the metrics loop runs at all
    pub enable_metrics: bool,
    /// Whether repeated cycle failures trigger an automatic restart
    pub enable_auto_restart: bool,
    /// Bounded auto-restart budget
    pub max_restart_attempts: u32,
    /// Delay between stop and start during a restart, in seconds
    pub restart_delay_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 60,
            metrics_collection_interval_secs: 300,
            enable_metrics: true,
            enable_auto_restart: true,
            max_restart_attempts: 3,
            restart_delay_secs: 10,
        }
    }
}

// ============================================================================
// Typed Configs (post-validation)
// ============================================================================

/// Immutable connection policy consumed by the device manager.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_retry_attempts: u32,
    pub retry_backoff_base: u32,
    pub connect_timeout: Duration,
    pub health_check_interval: Duration,
}

/// Immutable window/randomization parameters consumed by the schedule engine.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub random_min: NaiveTime,
    pub random_max: NaiveTime,
    pub cutoff: NaiveTime,
    pub min_interval_seconds: u64,
    pub max_interval_seconds: u64,
    pub jitter_factor: f64,
    pub max_failures_before_pause: u32,
    pub failure_pause_duration: Duration,
}

/// Immutable scheduler policy.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub health_check_interval: Duration,
    pub metrics_collection_interval: Duration,
    pub enable_metrics: bool,
    pub enable_auto_restart: bool,
    pub max_restart_attempts: u32,
    pub restart_delay: Duration,
}

/// Everything [`ServiceConfig::validate`] produces.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub connection: ConnectionConfig,
    pub window: WindowConfig,
    pub scheduler: SchedulerConfig,
    pub device: DeviceSection,
}

// ============================================================================
// Loading & Validation
// ============================================================================

impl ServiceConfig {
    /// Load configuration, searching `CLOCKSMITH_CONFIG` then
    /// `./clocksmith.toml`, falling back to built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("CLOCKSMITH_CONFIG") {
            info!(path = %path, "Loading config from CLOCKSMITH_CONFIG");
            return Self::from_path(Path::new(&path));
        }

        let local = Path::new("clocksmith.toml");
        if local.exists() {
            info!("Loading config from ./clocksmith.toml");
            return Self::from_path(local);
        }

        info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load configuration from an explicit path.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Validate the raw config and produce the typed configs.
    ///
    /// Fatal checks: time fields must parse, `window_start < window_end`,
    /// `random_min < random_max`, interval bounds ordered and positive,
    /// `jitter_factor` in `[0, 1]`, retry budget and backoff base >= 1.
    ///
    /// Warnings (logged, not fatal): random range outside the window, cutoff
    /// below `random_max` or beyond `window_end`.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let window_start = parse_time("window.window_start", &self.window.window_start)?;
        let window_end = parse_time("window.window_end", &self.window.window_end)?;
        let random_min = parse_time("window.random_min", &self.window.random_min)?;
        let random_max = parse_time("window.random_max", &self.window.random_max)?;
        let cutoff = parse_time("window.cutoff", &self.window.cutoff)?;

        if window_start >= window_end {
            return Err(ConfigError::InvalidValue {
                field: "window.window_start",
                reason: format!("window_start {window_start} must precede window_end {window_end}"),
            });
        }
        if random_min >= random_max {
            return Err(ConfigError::InvalidValue {
                field: "window.random_min",
                reason: format!("random_min {random_min} must precede random_max {random_max}"),
            });
        }
        if self.window.min_interval_seconds == 0 || self.window.max_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.min_interval_seconds",
                reason: "interval bounds must be positive".to_string(),
            });
        }
        if self.window.min_interval_seconds > self.window.max_interval_seconds {
            return Err(ConfigError::InvalidValue {
                field: "window.min_interval_seconds",
                reason: format!(
                    "min_interval_seconds {} exceeds max_interval_seconds {}",
                    self.window.min_interval_seconds, self.window.max_interval_seconds
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.window.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                field: "window.jitter_factor",
                reason: format!("{} is outside [0.0, 1.0]", self.window.jitter_factor),
            });
        }
        if self.connection.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.max_retry_attempts",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.connection.retry_backoff_base == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.retry_backoff_base",
                reason: "backoff base must be >= 1".to_string(),
            });
        }

        // Suspicious but workable orderings: warn, keep going.
        if random_min < window_start || random_max > window_end {
            warn!(
                random_range = %format!("{random_min}-{random_max}"),
                window = %format!("{window_start}-{window_end}"),
                "Random target range extends outside the service window"
            );
        }
        if cutoff < random_max {
            warn!(
                %cutoff,
                %random_max,
                "Cutoff precedes random_max; targets past the cutoff are unreachable"
            );
        }
        if cutoff > window_end {
            warn!(
                %cutoff,
                %window_end,
                "Cutoff lies beyond window_end; the wait-only tail is empty"
            );
        }

        Ok(ValidatedConfig {
            connection: ConnectionConfig {
                max_retry_attempts: self.connection.max_retry_attempts,
                retry_backoff_base: self.connection.retry_backoff_base,
                connect_timeout: Duration::from_secs(self.connection.connect_timeout_secs),
                health_check_interval: Duration::from_secs(
                    self.connection.health_check_interval_secs,
                ),
            },
            window: WindowConfig {
                window_start,
                window_end,
                random_min,
                random_max,
                cutoff,
                min_interval_seconds: self.window.min_interval_seconds,
                max_interval_seconds: self.window.max_interval_seconds,
                jitter_factor: self.window.jitter_factor,
                max_failures_before_pause: self.window.max_failures_before_pause,
                failure_pause_duration: Duration::from_secs(
                    self.window.failure_pause_duration_secs,
                ),
            },
            scheduler: SchedulerConfig {
                health_check_interval: Duration::from_secs(
                    self.scheduler.health_check_interval_secs,
                ),
                metrics_collection_interval: Duration::from_secs(
                    self.scheduler.metrics_collection_interval_secs,
                ),
                enable_metrics: self.scheduler.enable_metrics,
                enable_auto_restart: self.scheduler.enable_auto_restart,
                max_restart_attempts: self.scheduler.max_restart_attempts,
                restart_delay: Duration::from_secs(self.scheduler.restart_delay_secs),
            },
            device: self.device.clone(),
        })
    }
}

/// Parse an `HH:MM` (or `HH:MM:SS`) time-of-day field.
fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ConfigError::InvalidTime {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = ServiceConfig::default();
        let validated = cfg.validate().expect("defaults must validate");
        assert_eq!(validated.connection.max_retry_attempts, 5);
        assert_eq!(validated.window.min_interval_seconds, 30);
        assert!(validated.scheduler.enable_metrics);
    }

    #[test]
    fn inverted_window_is_fatal() {
        let mut cfg = ServiceConfig::default();
        cfg.window.window_start = "09:00".to_string();
        cfg.window.window_end = "08:00".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_random_range_is_fatal() {
        let mut cfg = ServiceConfig::default();
        cfg.window.random_min = "07:59".to_string();
        cfg.window.random_max = "07:55".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn random_range_outside_window_is_only_a_warning() {
        let mut cfg = ServiceConfig::default();
        cfg.window.random_min = "07:40".to_string();
        cfg.window.random_max = "07:45".to_string();
        // Outside [window_start, window_end] but still ordered, accepted.
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_retry_budget_is_fatal() {
        let mut cfg = ServiceConfig::default();
        cfg.connection.max_retry_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn jitter_factor_out_of_range_is_fatal() {
        let mut cfg = ServiceConfig::default();
        cfg.window.jitter_factor = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_time_string_is_fatal() {
        let mut cfg = ServiceConfig::default();
        cfg.window.cutoff = "eight".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTime { .. }));
    }

    #[test]
    fn toml_round_trip() {
        let toml_str = r#"
[device]
address = "10.0.0.7"
port = 4370
user = "admin"
secret = "hunter2"

[window]
window_start = "07:50"
window_end = "08:10"
random_min = "07:55"
random_max = "07:59"
cutoff = "08:00"
min_interval_seconds = 30
max_interval_seconds = 90
jitter_factor = 0.1
max_failures_before_pause = 3
failure_pause_duration_secs = 300
"#;
        let cfg: ServiceConfig = toml::from_str(toml_str).expect("valid");
        assert_eq!(cfg.device.address, "10.0.0.7");
        // Omitted sections fall back to defaults.
        assert_eq!(cfg.scheduler.max_restart_attempts, 3);
        assert!(cfg.validate().is_ok());
    }
}
