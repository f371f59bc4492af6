//! Diagnostics setup.
//!
//! Stdout belongs to command output (listings, JSON summaries), so log lines
//! only ever reach stderr and the rolling log file.

use crate::{config::LoggingConfig, paths::AppDirs};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "conduit.log";

/// Overrides `logging.level` with full filter directives, e.g.
/// `conduit_plugin=debug,info`.
pub const LOG_FILTER_ENV: &str = "CONDUIT_LOG";

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sinks {
    Stderr,
    File,
    Both,
}

impl Sinks {
    /// Stderr is used whenever nothing else is enabled so errors stay visible.
    fn for_config(config: &LoggingConfig) -> Self {
        match (config.stderr, config.file) {
            (true, true) => Sinks::Both,
            (false, true) => Sinks::File,
            (_, false) => Sinks::Stderr,
        }
    }

    fn uses_file(self) -> bool {
        self != Sinks::Stderr
    }
}

/// Keeps the background file writer alive; dropping it flushes pending lines.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_logging(config: &LoggingConfig, dirs: &AppDirs) -> Result<LoggingGuard, LoggingError> {
    let filter = filter_for(config, std::env::var(LOG_FILTER_ENV).ok().as_deref())?;
    let sinks = Sinks::for_config(config);

    let mut file_guard = None;
    let writer = if sinks.uses_file() {
        let (file, guard) = open_log_file(config, dirs.log_dir())?;
        file_guard = Some(guard);
        match sinks {
            Sinks::Both => BoxMakeWriter::new(std::io::stderr.and(file)),
            _ => BoxMakeWriter::new(file),
        }
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(sinks == Sinks::Stderr)
        .with_writer(writer)
        .try_init()
        .map_err(LoggingError::SubscriberInstall)?;

    tracing::debug!(?sinks, log_dir = %dirs.log_dir().display(), "Logging initialized");
    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn filter_for(config: &LoggingConfig, overridden: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let directives = overridden
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(config.level.as_filter_directive());
    EnvFilter::try_new(directives).map_err(|source| LoggingError::Filter {
        directives: directives.to_string(),
        source,
    })
}

fn open_log_file(
    config: &LoggingConfig,
    log_dir: &Path,
) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::LogDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let prefix = config.file_name.as_deref().unwrap_or(DEFAULT_LOG_FILE);
    prune_rotated(log_dir, prefix, config.max_log_files.max(1))?;

    Ok(tracing_appender::non_blocking(
        tracing_appender::rolling::daily(log_dir, prefix),
    ))
}

/// Deletes the oldest files named `<prefix>*` beyond `keep`, returning how
/// many were removed.
fn prune_rotated(dir: &Path, prefix: &str, keep: usize) -> Result<usize, LoggingError> {
    let listing = fs::read_dir(dir).map_err(|source| LoggingError::LogDirectory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut rotated: Vec<_> = listing
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();

    let excess = rotated.len().saturating_sub(keep);
    if excess == 0 {
        return Ok(0);
    }

    rotated.sort();
    for (_, path) in rotated.into_iter().take(excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::Prune { path, source })?;
    }
    Ok(excess)
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("log directory {path} is not usable: {source}")]
    LogDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid log filter {directives:?}: {source}")]
    Filter {
        directives: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to remove rotated log {path}: {source}")]
    Prune {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::time::{Duration, SystemTime};

    #[test]
    fn sinks_fall_back_to_stderr() {
        let mut config = LoggingConfig::default();
        assert_eq!(Sinks::for_config(&config), Sinks::Both);

        config.stderr = false;
        assert_eq!(Sinks::for_config(&config), Sinks::File);

        config.file = false;
        assert_eq!(Sinks::for_config(&config), Sinks::Stderr);
        assert!(!Sinks::Stderr.uses_file());
    }

    #[test]
    fn env_directives_override_level() {
        let config = LoggingConfig {
            level: LogLevel::Warn,
            ..LoggingConfig::default()
        };
        assert!(filter_for(&config, None).is_ok());
        assert!(filter_for(&config, Some("conduit_plugin=debug,info")).is_ok());
        // Blank overrides are ignored.
        assert!(filter_for(&config, Some("  ")).is_ok());
        assert!(matches!(
            filter_for(&config, Some("conduit=notalevel")),
            Err(LoggingError::Filter { .. })
        ));
    }

    #[test]
    fn pruning_keeps_newest_files() {
        let tmp = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for (i, name) in ["conduit.log.1", "conduit.log.2", "conduit.log.3"]
            .iter()
            .enumerate()
        {
            let file = fs::File::create(tmp.path().join(name)).unwrap();
            file.set_modified(base + Duration::from_secs(i as u64 * 60))
                .unwrap();
        }
        fs::write(tmp.path().join("unrelated.txt"), b"keep").unwrap();

        assert_eq!(prune_rotated(tmp.path(), "conduit.log", 2).unwrap(), 1);
        assert!(!tmp.path().join("conduit.log.1").exists());
        assert!(tmp.path().join("conduit.log.2").exists());
        assert!(tmp.path().join("conduit.log.3").exists());
        assert!(tmp.path().join("unrelated.txt").exists());

        assert_eq!(prune_rotated(tmp.path(), "conduit.log", 2).unwrap(), 0);
    }
}
