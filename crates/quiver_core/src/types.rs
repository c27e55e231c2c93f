//! Core type definitions for QuiverDB.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Row identifier of an item inside a namespace.
///
/// Row ids are reused after deletes; they are local to one namespace
/// implementation and are not stable across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub i32);

impl ItemId {
    /// Creates a new item ID.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a server in a replicated deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ServerId(pub i16);

impl ServerId {
    /// Highest server id that fits the LSN layout.
    pub const MAX: i16 = 999;

    /// Creates a new server ID.
    #[must_use]
    pub const fn new(id: i16) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i16(self) -> i16 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srv:{}", self.0)
    }
}

/// Log sequence number.
///
/// The raw value packs the originating server id above a per-namespace
/// counter: `server * 10^15 + counter`. `-1` is the empty LSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(i64);

impl Lsn {
    /// The empty LSN.
    pub const EMPTY: Lsn = Lsn(-1);

    const SERVER_MULTIPLIER: i64 = 1_000_000_000_000_000;

    /// Creates an LSN from a server id and a counter.
    #[must_use]
    pub const fn new(server: ServerId, counter: i64) -> Self {
        Self(server.0 as i64 * Self::SERVER_MULTIPLIER + counter)
    }

    /// Reinterprets a raw packed value.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw packed value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true for the empty LSN.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 < 0
    }

    /// Returns the counter part.
    #[must_use]
    pub const fn counter(self) -> i64 {
        if self.0 < 0 {
            -1
        } else {
            self.0 % Self::SERVER_MULTIPLIER
        }
    }

    /// Returns the originating server.
    #[must_use]
    pub const fn server(self) -> ServerId {
        if self.0 < 0 {
            ServerId(0)
        } else {
            ServerId((self.0 / Self::SERVER_MULTIPLIER) as i16)
        }
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("lsn:empty")
        } else {
            write!(f, "lsn:{}:{}", self.server().0, self.counter())
        }
    }
}

/// The two LSNs tracked for a replicated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LsnPair {
    /// Position in the upstream (leader) stream.
    pub upstream: Lsn,
    /// Position in the originating namespace's own WAL.
    pub origin: Lsn,
}

impl LsnPair {
    /// Creates a new LSN pair.
    #[must_use]
    pub const fn new(upstream: Lsn, origin: Lsn) -> Self {
        Self { upstream, origin }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_layout() {
        let lsn = Lsn::new(ServerId::new(7), 42);
        assert_eq!(lsn.server(), ServerId::new(7));
        assert_eq!(lsn.counter(), 42);
        assert_eq!(lsn.as_i64(), 7_000_000_000_000_042);
    }

    #[test]
    fn empty_lsn() {
        assert!(Lsn::EMPTY.is_empty());
        assert!(Lsn::default().is_empty());
        assert_eq!(Lsn::EMPTY.counter(), -1);
        assert_eq!(format!("{}", Lsn::EMPTY), "lsn:empty");
    }

    #[test]
    fn lsn_ordering_within_server() {
        let a = Lsn::new(ServerId::new(1), 5);
        let b = Lsn::new(ServerId::new(1), 6);
        assert!(a < b);
        assert!(Lsn::EMPTY < a);
    }
}
