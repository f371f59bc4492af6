//! Protocol name → connector constructor tables.
//!
//! A [`RegistryBuilder`] is filled once at startup and frozen into a
//! [`Registry`], which only supports lookups. Importers and exporters are
//! registered in separate tables: one protocol may provide either role or
//! both.

use crate::connector::{ConnectorConfig, ConnectorOptions, ConnectorResult, Exporter, Importer};
use crate::flags::Flags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub type ImporterCtor =
    fn(&ConnectorOptions, &str, &ConnectorConfig) -> ConnectorResult<Box<dyn Importer>>;

pub type ExporterCtor =
    fn(&ConnectorOptions, &str, &ConnectorConfig) -> ConnectorResult<Box<dyn Exporter>>;

/// Which side of a transfer a connector plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Importer,
    Exporter,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Importer => f.write_str("importer"),
            Role::Exporter => f.write_str("exporter"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{role} already registered for protocol {protocol}")]
    Duplicate { role: Role, protocol: String },
    #[error("no {role} registered for protocol {protocol}")]
    UnknownProtocol { role: Role, protocol: String },
}

/// A registered constructor together with the flags it declares.
#[derive(Clone, Copy)]
pub struct Registration<C> {
    pub flags: Flags,
    pub ctor: C,
}

impl<C> fmt::Debug for Registration<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    importers: BTreeMap<String, Registration<ImporterCtor>>,
    exporters: BTreeMap<String, Registration<ExporterCtor>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an importer; a second registration of the same protocol is
    /// rejected and leaves the first in place.
    pub fn register_importer(
        &mut self,
        protocol: &str,
        flags: Flags,
        ctor: ImporterCtor,
    ) -> Result<(), RegistryError> {
        insert_unique(&mut self.importers, Role::Importer, protocol, flags, ctor)
    }

    pub fn register_exporter(
        &mut self,
        protocol: &str,
        flags: Flags,
        ctor: ExporterCtor,
    ) -> Result<(), RegistryError> {
        insert_unique(&mut self.exporters, Role::Exporter, protocol, flags, ctor)
    }

    pub fn build(self) -> Registry {
        tracing::debug!(
            importers = self.importers.len(),
            exporters = self.exporters.len(),
            "Connector registry built"
        );
        Registry {
            importers: self.importers,
            exporters: self.exporters,
        }
    }
}

fn insert_unique<C>(
    table: &mut BTreeMap<String, Registration<C>>,
    role: Role,
    protocol: &str,
    flags: Flags,
    ctor: C,
) -> Result<(), RegistryError> {
    if table.contains_key(protocol) {
        return Err(RegistryError::Duplicate {
            role,
            protocol: protocol.to_string(),
        });
    }
    table.insert(protocol.to_string(), Registration { flags, ctor });
    Ok(())
}

/// Immutable protocol tables.
#[derive(Debug, Default)]
pub struct Registry {
    importers: BTreeMap<String, Registration<ImporterCtor>>,
    exporters: BTreeMap<String, Registration<ExporterCtor>>,
}

impl Registry {
    pub fn importer(&self, protocol: &str) -> Result<&Registration<ImporterCtor>, RegistryError> {
        self.importers
            .get(protocol)
            .ok_or_else(|| RegistryError::UnknownProtocol {
                role: Role::Importer,
                protocol: protocol.to_string(),
            })
    }

    pub fn exporter(&self, protocol: &str) -> Result<&Registration<ExporterCtor>, RegistryError> {
        self.exporters
            .get(protocol)
            .ok_or_else(|| RegistryError::UnknownProtocol {
                role: Role::Exporter,
                protocol: protocol.to_string(),
            })
    }

    /// Every registered (protocol, role, flags) triple, sorted by protocol.
    pub fn entries(&self) -> Vec<(&str, Role, Flags)> {
        let mut entries: Vec<_> = self
            .importers
            .iter()
            .map(|(p, r)| (p.as_str(), Role::Importer, r.flags))
            .chain(
                self.exporters
                    .iter()
                    .map(|(p, r)| (p.as_str(), Role::Exporter, r.flags)),
            )
            .collect();
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        entries
    }
}
