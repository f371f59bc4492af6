//! Host side of the Conduit connector protocol.
//!
//! This crate provides:
//! - [`ConnectorHost`], which resolves `<protocol>://` locations through a
//!   [`conduit_core::Registry`] and opens connectors after a flag handshake
//! - [`ImporterHandle`] and [`ExporterHandle`], which run one operation per
//!   call over freshly created channels
//! - [`transfer`], which pipes an importer into an exporter
//!
//! # Usage
//!
//! ```rust,ignore
//! use conduit_core::{CancellationToken, ConnectorConfig, ConnectorOptions, RegistryBuilder};
//! use conduit_plugin::{transfer, ConnectorHost};
//!
//! let mut builder = RegistryBuilder::new();
//! test_connector::register(&mut builder)?;
//! let host = ConnectorHost::new(builder.build(), ConnectorOptions::from_env());
//!
//! let cancel = CancellationToken::new();
//! let mut from = host.open_importer(&location("test:///data")).await?;
//! let to = host.open_exporter(&location("test:///restore")).await?;
//! let summary = transfer(&mut from, &to, &cancel).await?;
//! ```

mod host;
pub mod protocol;
mod session;

pub use host::{ConnectorHost, HostError};
pub use protocol::{registrations, PluginInfo, RegistrationInfo};
pub use session::{rebase, transfer, ExporterHandle, ImporterHandle, TransferSummary};
