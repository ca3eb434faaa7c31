use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// One hour between categorization and wake before a wake reports it
pub const DEFAULT_WAKE_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// Events collected before a ping is submitted
pub const DEFAULT_PING_SUBMISSION_THRESHOLD: usize = 10;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// When false, categorizations are validated and then dropped
    pub enabled: bool,
    pub wake_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_timeout_ms: DEFAULT_WAKE_TIMEOUT_MS,
        }
    }
}

/// Build and locale facts stamped onto every event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub app_version: String,
    pub channel: String,
    pub region: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            app_version: String::from("0"),
            channel: String::from("default"),
            region: String::from("US"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub ping_submission_threshold: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            ping_submission_threshold: DEFAULT_PING_SUBMISSION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub environment: Environment,
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Read and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else the default config file if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit `path` is unreadable, or if any file
    /// that exists fails to parse or validate.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match default_config_path() {
            Ok(path) if path.exists() => Self::load(&path),
            Ok(_) => Ok(Self::default()),
            Err(e) => {
                log::warn!("{e}; using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero wake timeout or ping threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.wake_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.wake_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.telemetry.ping_submission_threshold == 0 {
            return Err(ConfigError::Invalid(
                "telemetry.ping_submission_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the config cannot be encoded as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Get the config directory for serpwake.
///
/// # Errors
///
/// Returns an error if the user config directory cannot be determined.
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    path.push("serpwake");
    Ok(path)
}

/// # Errors
///
/// Returns an error if the user config directory cannot be determined.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}
