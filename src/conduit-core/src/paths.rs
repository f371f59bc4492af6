//! Per-user directories for `config.toml` and rotated logs.

use crate::{APP_AUTHOR, APP_NAME, APP_QUALIFIER};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Replaces the discovered config directory (useful for cron jobs and CI).
pub const CONFIG_DIR_ENV: &str = "CONDUIT_CONFIG_DIR";
/// Replaces the discovered log directory.
pub const LOG_DIR_ENV: &str = "CONDUIT_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    config_dir: PathBuf,
    log_dir: PathBuf,
}

impl AppDirs {
    /// Platform directories, with `CONDUIT_CONFIG_DIR` / `CONDUIT_LOG_DIR`
    /// taking precedence when set.
    pub fn discover() -> Result<Self, DirsError> {
        Self::resolve(
            std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from),
            std::env::var_os(LOG_DIR_ENV).map(PathBuf::from),
        )
    }

    fn resolve(config_dir: Option<PathBuf>, log_dir: Option<PathBuf>) -> Result<Self, DirsError> {
        if let (Some(config_dir), Some(log_dir)) = (&config_dir, &log_dir) {
            return Ok(Self {
                config_dir: config_dir.clone(),
                log_dir: log_dir.clone(),
            });
        }
        let project = ProjectDirs::from(APP_QUALIFIER, APP_AUTHOR, APP_NAME)
            .ok_or(DirsError::NoHomeDirectory)?;
        Ok(Self {
            config_dir: config_dir.unwrap_or_else(|| project.config_dir().to_path_buf()),
            log_dir: log_dir.unwrap_or_else(|| project.data_local_dir().join("logs")),
        })
    }

    /// Both directories under one explicit root.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            log_dir: root.join("logs"),
        }
    }

    pub fn ensure_exists(&self) -> Result<(), DirsError> {
        [&self.config_dir, &self.log_dir]
            .into_iter()
            .try_for_each(|dir| {
                std::fs::create_dir_all(dir).map_err(|source| DirsError::Create {
                    path: dir.clone(),
                    source,
                })
            })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

#[derive(Debug, Error)]
pub enum DirsError {
    #[error("no home directory to place Conduit configuration in; set CONDUIT_CONFIG_DIR and CONDUIT_LOG_DIR")]
    NoHomeDirectory,
    #[error("cannot create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}
