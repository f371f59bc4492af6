use crate::channel::{RecordReceiver, RecordSender, ResultReceiver, ResultSender};
use crate::flags::Flags;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Free-form connector configuration; `location` is the only required key.
pub type ConnectorConfig = BTreeMap<String, String>;

/// Host-supplied context handed to every connector constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorOptions {
    pub hostname: String,
    pub username: String,
    pub operating_system: String,
    pub architecture: String,
    /// Working directory used to resolve relative `LOCALFS` locations.
    pub cwd: PathBuf,
    pub max_concurrency: usize,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost".into(),
            username: String::new(),
            operating_system: std::env::consts::OS.into(),
            architecture: std::env::consts::ARCH.into(),
            cwd: PathBuf::from("/"),
            max_concurrency: 1,
        }
    }
}

impl ConnectorOptions {
    /// Options describing the current process.
    ///
    /// The host name comes from the kernel (`/proc/sys/kernel/hostname`,
    /// then `/etc/hostname`) or `COMPUTERNAME` on Windows. `HOSTNAME` is only
    /// consulted after those because shells rarely export it.
    pub fn from_env() -> Self {
        let hostname = first_hostname([
            std::fs::read_to_string("/proc/sys/kernel/hostname").ok(),
            std::fs::read_to_string("/etc/hostname").ok(),
            std::env::var("COMPUTERNAME").ok(),
            std::env::var("HOSTNAME").ok(),
        ]);
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let max_concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            hostname,
            username,
            cwd,
            max_concurrency,
            ..Self::default()
        }
    }
}

/// First non-blank candidate, trimmed, or `localhost`.
fn first_hostname(candidates: impl IntoIterator<Item = Option<String>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".into())
}

/// Broad classes of connector failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed configuration; fatal at construction.
    Configuration,
    /// Source or destination unreachable.
    Reachability,
    /// Traversal failed.
    Enumeration,
    /// A single item could not be transferred.
    Transfer,
    /// Channel discipline was violated.
    Protocol,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("missing location")]
    MissingLocation,
    #[error("empty path after {protocol}://")]
    EmptyLocation { protocol: String },
    #[error("invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },
    #[error("cannot access {path}: {source}")]
    Unreachable {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to enumerate {path}: {message}")]
    Enumeration { path: String, message: String },
    #[error("failed to transfer {path}: {source}")]
    Transfer {
        path: String,
        source: std::io::Error,
    },
    #[error("protocol violation: {message}")]
    Protocol { message: String },
    #[error("operation cancelled")]
    Cancelled,
}

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingLocation | Self::EmptyLocation { .. } | Self::InvalidConfig { .. } => {
                ErrorKind::Configuration
            }
            Self::Unreachable { .. } => ErrorKind::Reachability,
            Self::Enumeration { .. } => ErrorKind::Enumeration,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Lifecycle shared by importers and exporters.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolved root the connector operates on.
    fn root(&self) -> &str;

    /// Identifier of the machine or service the data lives on.
    fn origin(&self) -> &str;

    /// Connector type name (e.g., "test").
    fn kind(&self) -> &str;

    /// Capability flags; fixed for the lifetime of the instance.
    fn flags(&self) -> Flags;

    /// Cheap reachability check without side effects.
    async fn ping(&self, cancel: &CancellationToken) -> ConnectorResult<()>;

    /// Releases held resources. Must succeed when nothing was acquired and
    /// tolerate repeated calls.
    async fn close(&self, cancel: &CancellationToken) -> ConnectorResult<()>;
}

/// Producer side: reads a source and emits records.
#[async_trait]
pub trait Importer: Connector {
    /// Emits one record per transferable entry, then returns.
    ///
    /// `records` is dropped when this returns, which ends the sequence for the
    /// host. Connectors flagged [`Flags::NEEDACK`] read `results` until the
    /// host closes it; others may drop it unread.
    async fn import(
        &self,
        cancel: &CancellationToken,
        records: RecordSender,
        results: ResultReceiver,
    ) -> ConnectorResult<()>;
}

/// Consumer side: materializes records and acknowledges each one.
#[async_trait]
pub trait Exporter: Connector {
    /// Consumes `records` until the host closes it, sending exactly one
    /// result per record. `results` is dropped when this returns.
    ///
    /// On cancellation an exporter may return without draining `records`;
    /// unread records are dropped unopened and get no result.
    async fn export(
        &self,
        cancel: &CancellationToken,
        records: RecordReceiver,
        results: ResultSender,
    ) -> ConnectorResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_taxonomy() {
        assert_eq!(
            ConnectorError::MissingLocation.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ConnectorError::Unreachable {
                path: "/nope".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }
            .kind(),
            ErrorKind::Reachability
        );
        assert_eq!(ConnectorError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn error_messages_name_the_problem() {
        assert_eq!(ConnectorError::MissingLocation.to_string(), "missing location");
        assert_eq!(
            ConnectorError::EmptyLocation {
                protocol: "test".into()
            }
            .to_string(),
            "empty path after test://"
        );
    }

    #[test]
    fn hostname_takes_first_non_blank_candidate() {
        assert_eq!(
            first_hostname([None, Some(" \n".into()), Some("backup01\n".into())]),
            "backup01"
        );
        assert_eq!(first_hostname([None, None]), "localhost");
    }

    #[test]
    fn default_options_describe_platform() {
        let opts = ConnectorOptions::default();
        assert_eq!(opts.hostname, "localhost");
        assert_eq!(opts.operating_system, std::env::consts::OS);
        assert!(opts.max_concurrency >= 1);
    }
}
