//! Collection sync keys.
//!
//! A sync key is `{<uuid>}<counter>`. The uuid is minted when a collection
//! is paired from key `0` and stays fixed for the lineage; the counter
//! increments on every exchange that advances state.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A collection's version token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SyncKey {
    /// The distinguished `0` key: no prior state.
    Initial,
    /// A key issued by the server.
    Issued {
        /// Random identifier of the key lineage.
        lineage: Uuid,
        /// Position within the lineage, starting at 1.
        counter: u64,
    },
}

impl SyncKey {
    /// Parses a wire sync key.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        if raw == "0" {
            return Ok(Self::Initial);
        }
        let invalid = || ProtocolError::InvalidSyncKey(raw.to_string());
        let rest = raw.strip_prefix('{').ok_or_else(invalid)?;
        let (lineage, counter) = rest.split_once('}').ok_or_else(invalid)?;
        let lineage = Uuid::parse_str(lineage).map_err(|_| invalid())?;
        let counter: u64 = counter.parse().map_err(|_| invalid())?;
        if counter == 0 {
            return Err(invalid());
        }
        Ok(Self::Issued { lineage, counter })
    }

    /// Returns true for the `0` key.
    pub fn is_initial(&self) -> bool {
        matches!(self, Self::Initial)
    }

    /// Returns the counter; `0` for the initial key.
    pub fn counter(&self) -> u64 {
        match self {
            Self::Initial => 0,
            Self::Issued { counter, .. } => *counter,
        }
    }

    /// Returns the lineage identifier of an issued key.
    pub fn lineage(&self) -> Option<Uuid> {
        match self {
            Self::Initial => None,
            Self::Issued { lineage, .. } => Some(*lineage),
        }
    }

    /// Returns the key that follows this one.
    ///
    /// Starting from `0` mints a fresh random lineage.
    pub fn next(&self) -> Self {
        match self {
            Self::Initial => Self::Issued {
                lineage: Uuid::new_v4(),
                counter: 1,
            },
            Self::Issued { lineage, counter } => Self::Issued {
                lineage: *lineage,
                counter: counter.saturating_add(1),
            },
        }
    }

    /// Returns true if `self` is ordered strictly after `previous`.
    pub fn follows(&self, previous: &SyncKey) -> bool {
        match (previous, self) {
            (Self::Initial, Self::Issued { .. }) => true,
            (
                Self::Issued {
                    lineage: a,
                    counter: before,
                },
                Self::Issued {
                    lineage: b,
                    counter: after,
                },
            ) => a == b && after > before,
            _ => false,
        }
    }
}

impl Default for SyncKey {
    fn default() -> Self {
        Self::Initial
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => f.write_str("0"),
            Self::Issued { lineage, counter } => write!(f, "{{{lineage}}}{counter}"),
        }
    }
}

impl FromStr for SyncKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SyncKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SyncKey> for String {
    fn from(key: SyncKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_initial() {
        assert_eq!(SyncKey::parse("0").unwrap(), SyncKey::Initial);
        assert_eq!(SyncKey::Initial.to_string(), "0");
    }

    #[test]
    fn parse_issued() {
        let raw = "{550e8400-e29b-41d4-a716-446655440000}7";
        let key = SyncKey::parse(raw).unwrap();
        assert_eq!(key.counter(), 7);
        assert_eq!(key.to_string(), raw);
    }

    #[test]
    fn parse_rejects_garbage() {
        for raw in [
            "",
            "abc",
            "{550e8400-e29b-41d4-a716-446655440000}",
            "{550e8400-e29b-41d4-a716-446655440000}0",
            "{not-a-uuid}1",
            "550e8400-e29b-41d4-a716-446655440000}1",
        ] {
            assert!(SyncKey::parse(raw).is_err(), "{raw:?} should not parse");
        }
    }

    #[test]
    fn next_from_initial_mints_lineage() {
        let a = SyncKey::Initial.next();
        let b = SyncKey::Initial.next();
        assert_eq!(a.counter(), 1);
        assert_ne!(a.lineage(), b.lineage());
        assert!(a.follows(&SyncKey::Initial));
    }

    #[test]
    fn next_keeps_lineage() {
        let first = SyncKey::Initial.next();
        let second = first.next();
        assert_eq!(first.lineage(), second.lineage());
        assert_eq!(second.counter(), 2);
        assert!(second.follows(&first));
        assert!(!first.follows(&second));
        assert!(!second.follows(&SyncKey::Initial.next()));
    }

    proptest! {
        #[test]
        fn advancing_is_strictly_monotonic(steps in 1usize..50) {
            let mut key = SyncKey::Initial;
            for _ in 0..steps {
                let next = key.next();
                prop_assert!(next.follows(&key));
                prop_assert_eq!(next.counter(), key.counter() + 1);
                prop_assert_eq!(SyncKey::parse(&next.to_string()).unwrap(), next.clone());
                key = next;
            }
        }
    }
}
