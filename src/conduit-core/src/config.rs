use crate::channel::DEFAULT_RECORD_BUFFER;
use crate::connector::ConnectorConfig;
use crate::location::LOCATION_KEY;
use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Named connector configurations, addressed as `@name`.
    #[serde(default)]
    pub locations: BTreeMap<String, ConnectorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            transfer: TransferConfig::default(),
            locations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    /// Mirror logs to stderr. Stdout is never used for diagnostics.
    #[serde(default = "default_stderr_enabled")]
    pub stderr: bool,
    /// Write a daily-rolling log file in the application log directory.
    #[serde(default = "default_file_enabled")]
    pub file: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stderr: default_stderr_enabled(),
            file: default_file_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferConfig {
    /// Capacity of record channels.
    #[serde(default = "default_record_buffer")]
    pub record_buffer: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            record_buffer: default_record_buffer(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("transfer.record_buffer must be at least 1")]
    EmptyRecordBuffer,
    #[error("location @{name} has no `location` key")]
    LocationWithoutTarget { name: String },
    #[error("unknown location @{name}")]
    UnknownLocation { name: String },
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.transfer.record_buffer == 0 {
            return Err(ValidationError::EmptyRecordBuffer);
        }
        if let Some(name) = self
            .locations
            .iter()
            .find(|(_, cfg)| !cfg.contains_key(LOCATION_KEY))
            .map(|(name, _)| name)
        {
            return Err(ValidationError::LocationWithoutTarget { name: name.clone() });
        }
        Ok(())
    }

    /// Turns a command-line location into a connector configuration.
    ///
    /// `@name` selects a configured location; anything else becomes
    /// `{ location = <arg> }`.
    pub fn resolve_location(&self, arg: &str) -> Result<ConnectorConfig, ValidationError> {
        match arg.strip_prefix('@') {
            Some(name) => self
                .locations
                .get(name)
                .cloned()
                .ok_or_else(|| ValidationError::UnknownLocation {
                    name: name.to_string(),
                }),
            None => Ok(ConnectorConfig::from([(
                LOCATION_KEY.to_string(),
                arg.to_string(),
            )])),
        }
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stderr_enabled() -> bool {
    true
}

fn default_file_enabled() -> bool {
    true
}

fn default_record_buffer() -> usize {
    DEFAULT_RECORD_BUFFER
}
