//! Parsing of `<protocol>://<remainder>` locations.

use crate::connector::{ConnectorConfig, ConnectorError, ConnectorResult};
use path_clean::PathClean;
use std::path::Path;

pub const LOCATION_KEY: &str = "location";

/// Splits a location into its protocol and remainder.
///
/// Returns `None` when the location carries no `://` separator or the
/// protocol part is empty.
pub fn split_protocol(location: &str) -> Option<(&str, &str)> {
    let (protocol, rest) = location.split_once("://")?;
    if protocol.is_empty() {
        return None;
    }
    Some((protocol, rest))
}

/// Reads `location` from a connector configuration and strips the
/// `<protocol>://` prefix.
///
/// A location without the prefix is taken verbatim.
pub fn strip_location(protocol: &str, config: &ConnectorConfig) -> ConnectorResult<String> {
    let location = config
        .get(LOCATION_KEY)
        .ok_or(ConnectorError::MissingLocation)?;
    let prefix = format!("{protocol}://");
    let remainder = location.strip_prefix(&prefix).unwrap_or(location);
    if remainder.is_empty() {
        return Err(ConnectorError::EmptyLocation {
            protocol: protocol.to_string(),
        });
    }
    Ok(remainder.to_string())
}

/// Rewrites a relative location remainder into an absolute one under `cwd`.
///
/// Absolute remainders and locations without a protocol prefix are returned
/// unchanged apart from lexical cleaning of the path.
pub fn absolutize(location: &str, cwd: &Path) -> String {
    let Some((protocol, rest)) = split_protocol(location) else {
        return location.to_string();
    };
    if rest.is_empty() {
        return location.to_string();
    }
    let path = Path::new(rest);
    let resolved = if path.is_absolute() {
        path.to_path_buf().clean()
    } else {
        cwd.join(path).clean()
    };
    format!("{protocol}://{}", resolved.display())
}
