//! Host that resolves locations to connectors and opens them.

use crate::protocol::PluginInfo;
use crate::session::{ExporterHandle, ImporterHandle};
use conduit_core::location::{absolutize, split_protocol, LOCATION_KEY};
use conduit_core::{
    CancellationToken, Connector, ConnectorConfig, ConnectorError, ConnectorOptions, ErrorKind,
    Flags, Registry, RegistryError, Role, DEFAULT_RECORD_BUFFER,
};
use thiserror::Error;

/// Errors from host operations.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("configuration has no location")]
    MissingLocation,
    #[error("location {location} has no <protocol>:// prefix")]
    MissingProtocol { location: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{protocol} connector failed: {source}")]
    Connector {
        protocol: String,
        source: ConnectorError,
    },
    #[error("{protocol} {role} was registered with {declared} but reports {reported}")]
    FlagMismatch {
        protocol: String,
        role: Role,
        declared: Flags,
        reported: Flags,
    },
    #[error("{protocol} importer is single-pass and was already consumed")]
    StreamConsumed { protocol: String },
    #[error("exporter returned {received} results for {sent} records")]
    ResultCountMismatch { sent: usize, received: usize },
}

impl HostError {
    pub(crate) fn connector(protocol: &str, source: ConnectorError) -> Self {
        Self::Connector {
            protocol: protocol.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingLocation | Self::MissingProtocol { .. } | Self::Registry(_) => {
                ErrorKind::Configuration
            }
            Self::Connector { source, .. } => source.kind(),
            Self::FlagMismatch { .. }
            | Self::StreamConsumed { .. }
            | Self::ResultCountMismatch { .. } => ErrorKind::Protocol,
        }
    }
}

/// Owns the registration table and the options handed to connectors.
#[derive(Debug)]
pub struct ConnectorHost {
    registry: Registry,
    options: ConnectorOptions,
    record_buffer: usize,
}

impl ConnectorHost {
    pub fn new(registry: Registry, options: ConnectorOptions) -> Self {
        Self {
            registry,
            options,
            record_buffer: DEFAULT_RECORD_BUFFER,
        }
    }

    /// Capacity of the record channels this host creates.
    pub fn with_record_buffer(mut self, record_buffer: usize) -> Self {
        self.record_buffer = record_buffer.max(1);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &ConnectorOptions {
        &self.options
    }

    /// Constructs the importer registered for the location's protocol.
    pub async fn open_importer(&self, config: &ConnectorConfig) -> Result<ImporterHandle, HostError> {
        let protocol = protocol_of(config)?;
        let registration = self.registry.importer(&protocol)?;
        let config = self.prepare_config(config, registration.flags);

        let importer = (registration.ctor)(&self.options, &protocol, &config)
            .map_err(|e| HostError::connector(&protocol, e))?;
        let info = PluginInfo::describe(&protocol, Role::Importer, importer.as_ref());
        verify_flags(&info, registration.flags, importer.as_ref()).await?;

        tracing::info!(
            protocol = %info.protocol,
            root = %info.root,
            flags = %info.flags,
            "Importer opened"
        );
        Ok(ImporterHandle::new(info, importer, self.record_buffer))
    }

    /// Constructs the exporter registered for the location's protocol.
    pub async fn open_exporter(&self, config: &ConnectorConfig) -> Result<ExporterHandle, HostError> {
        let protocol = protocol_of(config)?;
        let registration = self.registry.exporter(&protocol)?;
        let config = self.prepare_config(config, registration.flags);

        let exporter = (registration.ctor)(&self.options, &protocol, &config)
            .map_err(|e| HostError::connector(&protocol, e))?;
        let info = PluginInfo::describe(&protocol, Role::Exporter, exporter.as_ref());
        verify_flags(&info, registration.flags, exporter.as_ref()).await?;

        tracing::info!(
            protocol = %info.protocol,
            root = %info.root,
            flags = %info.flags,
            "Exporter opened"
        );
        Ok(ExporterHandle::new(info, exporter, self.record_buffer))
    }

    /// Applies host-side location handling for the declared flags.
    fn prepare_config(&self, config: &ConnectorConfig, flags: Flags) -> ConnectorConfig {
        let mut config = config.clone();
        if flags.contains(Flags::LOCALFS) {
            if let Some(location) = config.get_mut(LOCATION_KEY) {
                *location = absolutize(location, &self.options.cwd);
            }
        }
        config
    }
}

fn protocol_of(config: &ConnectorConfig) -> Result<String, HostError> {
    let location = config
        .get(LOCATION_KEY)
        .ok_or(HostError::MissingLocation)?;
    split_protocol(location)
        .map(|(protocol, _)| protocol.to_string())
        .ok_or_else(|| HostError::MissingProtocol {
            location: location.clone(),
        })
}

/// The flags a connector reports must match what it registered with.
async fn verify_flags<C: Connector + ?Sized>(
    info: &PluginInfo,
    declared: Flags,
    connector: &C,
) -> Result<(), HostError> {
    if info.flags == declared {
        return Ok(());
    }
    if let Err(err) = connector.close(&CancellationToken::new()).await {
        tracing::warn!(protocol = %info.protocol, error = %err, "Failed to close rejected connector");
    }
    Err(HostError::FlagMismatch {
        protocol: info.protocol.clone(),
        role: info.role,
        declared,
        reported: info.flags,
    })
}
