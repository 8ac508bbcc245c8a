//! Error types for state persistence.

use thiserror::Error;

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by a [`crate::StateStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// No state exists for the key; the device must resync from `0`.
    #[error("no sync state for collection {collection} at key {key}")]
    Gone {
        /// Collection id.
        collection: String,
        /// Key presented.
        key: String,
    },

    /// The key was superseded by a later exchange.
    #[error("sync state for collection {collection} at key {key} was superseded")]
    Stale {
        /// Collection id.
        collection: String,
        /// Key presented.
        key: String,
    },

    /// The device cache was saved by another request since it was loaded.
    #[error("sync cache for device {device} changed concurrently")]
    CacheStale {
        /// Device id.
        device: String,
    },

    /// A commit tried to move to a key that does not follow the current one.
    #[error("sync key {next} does not follow {previous}")]
    InvalidTransition {
        /// Current key.
        previous: String,
        /// Proposed key.
        next: String,
    },

    /// A snapshot could not be encoded or decoded.
    #[error("state serialization failed: {0}")]
    Serialization(String),

    /// The underlying store failed.
    #[error("state storage failed: {0}")]
    Storage(String),
}

impl StateError {
    /// Create a gone error.
    pub fn gone(collection: impl Into<String>, key: impl ToString) -> Self {
        Self::Gone {
            collection: collection.into(),
            key: key.to_string(),
        }
    }

    /// Create a stale error.
    pub fn stale(collection: impl Into<String>, key: impl ToString) -> Self {
        Self::Stale {
            collection: collection.into(),
            key: key.to_string(),
        }
    }

    /// Returns true if the device can recover by resynchronizing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Gone { .. } | Self::Stale { .. } | Self::CacheStale { .. } | Self::InvalidTransition { .. }
        )
    }
}
