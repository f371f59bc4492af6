//! Handshake descriptors exchanged between the host and its connectors.

use conduit_core::{Connector, Flags, Registry, Role};
use serde::{Deserialize, Serialize};

/// What the host learned about a connector when it opened it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Protocol the connector was resolved from.
    pub protocol: String,
    pub role: Role,
    /// Connector type reported by the connector itself.
    pub kind: String,
    pub root: String,
    pub origin: String,
    pub flags: Flags,
}

impl PluginInfo {
    pub(crate) fn describe<C: Connector + ?Sized>(protocol: &str, role: Role, connector: &C) -> Self {
        Self {
            protocol: protocol.to_string(),
            role,
            kind: connector.kind().to_string(),
            root: connector.root().to_string(),
            origin: connector.origin().to_string(),
            flags: connector.flags(),
        }
    }
}

/// One row of the registration table, as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub protocol: String,
    pub role: Role,
    pub flags: Flags,
    /// Flag names, for readers that do not decode bits.
    pub flag_names: Vec<String>,
}

/// Lists every registered connector, sorted by protocol then role.
pub fn registrations(registry: &Registry) -> Vec<RegistrationInfo> {
    registry
        .entries()
        .into_iter()
        .map(|(protocol, role, flags)| RegistrationInfo {
            protocol: protocol.to_string(),
            role,
            flags,
            flag_names: flags.names().map(str::to_string).collect(),
        })
        .collect()
}
