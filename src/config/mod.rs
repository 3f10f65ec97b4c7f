/// Configuration management for the verifier
///
/// Two sources feed a run: the endpoint file (`endpoint`, plain `key=value`,
/// never fatal) and the optional TOML settings file (`Settings`, validated).

pub mod endpoint;

pub use endpoint::{load_endpoint, ConfigIssue, ConfigReport, Endpoint};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/master_slave_verifier.conf";
pub const DEFAULT_PID_FILE: &str = "/tmp/master_slave_verifier.pid";
pub const DEFAULT_LOG_FILE: &str = "/var/log/master_slave_verifier.log";
pub const DEFAULT_TOKEN_FILE: &str = "/tmp/token.msv";

/// Upper bound for every retry duration setting (one day)
pub const MAX_DURATION_SEC: u64 = 86_400;

/// Main verifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Artifact locations
    pub artifacts: ArtifactConfig,
    /// Retry loop policy
    pub retry: RetryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Paths of the files the verifier reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Endpoint file (`address=`, `port=`)
    pub config_file: PathBuf,
    /// Launcher writes the daemon PID here
    pub pid_file: PathBuf,
    /// Run log
    pub log_file: PathBuf,
    /// Written with `true` once the endpoint is reachable
    pub token_file: PathBuf,
    /// Remove the PID file after a successful run
    pub remove_pid_on_exit: bool,
}

/// Retry loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay between attempts in seconds
    pub interval_sec: u64,
    /// Growth factor applied to the delay after each failure (1.0 = fixed)
    pub multiplier: f64,
    /// Upper bound for the delay in seconds
    pub max_interval_sec: u64,
    /// Randomise each delay between zero and its computed value
    pub jitter: bool,
    /// Stop after this many attempts (unbounded when absent)
    pub max_attempts: Option<u32>,
    /// Per-attempt connect timeout in seconds
    pub connect_timeout_sec: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            remove_pid_on_exit: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_sec: 5,
            multiplier: 1.0,
            max_interval_sec: 300,
            jitter: false,
            max_attempts: None,
            connect_timeout_sec: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            artifacts: ArtifactConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_sec)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let settings: Settings = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "retry interval_sec must be greater than 0".to_string(),
            ));
        }

        if !(self.retry.multiplier >= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "retry multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }

        if self.retry.max_interval_sec < self.retry.interval_sec {
            return Err(ConfigError::ValidationError(
                "retry max_interval_sec must not be less than interval_sec".to_string(),
            ));
        }

        for (name, secs) in [
            ("interval_sec", self.retry.interval_sec),
            ("max_interval_sec", self.retry.max_interval_sec),
            ("connect_timeout_sec", self.retry.connect_timeout_sec),
        ] {
            if secs > MAX_DURATION_SEC {
                return Err(ConfigError::ValidationError(format!(
                    "retry {} must not exceed {}, got {}",
                    name, MAX_DURATION_SEC, secs
                )));
            }
        }

        if self.retry.max_attempts == Some(0) {
            return Err(ConfigError::ValidationError(
                "retry max_attempts must be greater than 0 when set".to_string(),
            ));
        }

        if self.retry.connect_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "retry connect_timeout_sec must be greater than 0".to_string(),
            ));
        }

        let artifacts = &self.artifacts;
        for (name, path) in [
            ("pid_file", &artifacts.pid_file),
            ("log_file", &artifacts.log_file),
            ("token_file", &artifacts.token_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "artifacts {} cannot be empty",
                    name
                )));
            }
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        Ok(())
    }

    /// Rewrite every artifact path as an absolute path against `base`
    ///
    /// The daemon changes directory to `/` after forking, so relative paths
    /// given on the command line must be pinned first.
    pub fn absolutize(&mut self, base: &Path) {
        let artifacts = &mut self.artifacts;
        for path in [
            &mut artifacts.config_file,
            &mut artifacts.pid_file,
            &mut artifacts.log_file,
            &mut artifacts.token_file,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Create an example settings file
    pub fn create_example_settings<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let settings = Settings {
            retry: RetryConfig {
                multiplier: 2.0,
                max_interval_sec: 60,
                jitter: true,
                ..Default::default()
            },
            ..Default::default()
        };

        settings.save_to_file(path)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
