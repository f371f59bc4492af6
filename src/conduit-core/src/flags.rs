use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;
use thiserror::Error;

/// Capability flags a connector advertises to the host.
///
/// Flags are fixed when the connector is constructed and compose bitwise;
/// no flag depends on another.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// The host resolves relative locations against its working directory.
    pub const LOCALFS: Flags = Flags(1 << 0);
    /// Storage-only: the backend is a single file rather than a tree.
    pub const FILE: Flags = Flags(1 << 1);
    /// Import may run at most once; its output cannot be replayed.
    pub const STREAM: Flags = Flags(1 << 2);
    /// Import consumes the acknowledgment channel.
    pub const NEEDACK: Flags = Flags(1 << 3);

    const NAMED: [(Flags, &'static str); 4] = [
        (Flags::LOCALFS, "LOCALFS"),
        (Flags::FILE, "FILE"),
        (Flags::STREAM, "STREAM"),
        (Flags::NEEDACK, "NEEDACK"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, discarding bits with no known meaning.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Flags(bits & 0b1111)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Flags) -> Self {
        Flags(self.0 | other.0)
    }

    /// Names of the flags that are set, in declaration order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMED
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<_> = self.names().collect();
        f.write_str(&names.join(" | "))
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({self})")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown capability flag: {0}")]
pub struct UnknownFlag(pub String);

impl FromStr for Flags {
    type Err = UnknownFlag;

    /// Parses a `|` or `,` separated list of flag names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Flags::NONE;
        for part in s.split(['|', ',']).map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("none") {
                continue;
            }
            let (flag, _) = Self::NAMED
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(part))
                .ok_or_else(|| UnknownFlag(part.to_string()))?;
            flags |= *flag;
        }
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose_without_ordering() {
        let a = Flags::LOCALFS | Flags::NEEDACK;
        let b = Flags::NEEDACK | Flags::LOCALFS;
        assert_eq!(a, b);
        assert!(a.contains(Flags::LOCALFS));
        assert!(a.contains(Flags::NEEDACK));
        assert!(!a.contains(Flags::STREAM));
        assert_eq!(a.bits(), 0b1001);
    }

    #[test]
    fn display_lists_names() {
        assert_eq!(Flags::NONE.to_string(), "NONE");
        assert_eq!((Flags::STREAM | Flags::FILE).to_string(), "FILE | STREAM");
    }

    #[test]
    fn parses_names() {
        assert_eq!(
            "localfs, stream".parse::<Flags>().unwrap(),
            Flags::LOCALFS | Flags::STREAM
        );
        assert_eq!("".parse::<Flags>().unwrap(), Flags::NONE);
        assert_eq!(
            "bogus".parse::<Flags>(),
            Err(UnknownFlag("bogus".to_string()))
        );
    }

    #[test]
    fn truncates_unknown_bits() {
        assert_eq!(Flags::from_bits_truncate(0xff), Flags::from_bits_truncate(0b1111));
    }

    #[test]
    fn serializes_as_bits() {
        let json = serde_json::to_string(&(Flags::LOCALFS | Flags::NEEDACK)).unwrap();
        assert_eq!(json, "9");
    }
}
