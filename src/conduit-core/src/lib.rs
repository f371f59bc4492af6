//! Core protocol types for Conduit connectors.
//!
//! A connector is an [`Importer`] (reads a source and emits [`Record`]s), an
//! [`Exporter`] (materializes records and acknowledges each with a
//! [`TransferResult`]), or both. Hosts find connectors through a [`Registry`]
//! keyed by protocol name.

pub mod channel;
pub mod config;
pub mod connector;
pub mod connector_contract;
pub mod flags;
pub mod location;
pub mod logging;
pub mod paths;
pub mod record;
pub mod registry;

pub use channel::{
    record_channel, result_channel, ChannelClosed, RecordReceiver, RecordSender, ResultReceiver,
    ResultSender, DEFAULT_RECORD_BUFFER,
};
pub use config::{Config, ConfigError, LogLevel, LoggingConfig, TransferConfig, ValidationError};
pub use connector::{
    Connector, ConnectorConfig, ConnectorError, ConnectorOptions, ConnectorResult, ErrorKind,
    Exporter, Importer,
};
pub use flags::Flags;
pub use logging::{init_logging, LoggingError, LoggingGuard, LOG_FILTER_ENV};
pub use paths::{AppDirs, DirsError, CONFIG_DIR_ENV, LOG_DIR_ENV};
pub use record::{
    ContentReader, ContentSource, FileInfo, FileSource, MemorySource, Outcome, Record,
    TransferResult,
};
pub use registry::{Registry, RegistryBuilder, RegistryError, Role};

/// Cancellation context passed to every connector call.
pub use tokio_util::sync::CancellationToken;

pub const APP_NAME: &str = "conduit";
pub const APP_AUTHOR: &str = "Conduit";
pub const APP_QUALIFIER: &str = "io";
