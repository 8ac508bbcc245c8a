//! Error types for the sync engine.

use crate::backend::BackendError;
use airsync_codec::CodecError;
use airsync_protocol::{ProtocolError, SyncStatus};
use airsync_state::StateError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while handling a Sync request.
///
/// Only [`EngineError::Cancelled`] leaves the handler; every other error is
/// turned into a status response.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The request did not decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The response did not encode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The state store failed.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The backend failed for the whole request.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl EngineError {
    /// Returns true if the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Global status reported for this error.
    pub fn status(&self) -> SyncStatus {
        match self {
            Self::Protocol(_) | Self::Codec(_) => SyncStatus::ProtocolError,
            Self::State(
                StateError::Gone { .. }
                | StateError::Stale { .. }
                | StateError::CacheStale { .. }
                | StateError::InvalidTransition { .. },
            ) => SyncStatus::KeyMismatch,
            Self::State(_) | Self::Cancelled => SyncStatus::ServerError,
            Self::Backend(e) => e.collection_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            EngineError::from(ProtocolError::MissingElement("CollectionId")).status(),
            SyncStatus::ProtocolError
        );
        assert_eq!(
            EngineError::from(StateError::CacheStale {
                device: "dev".into()
            })
            .status(),
            SyncStatus::KeyMismatch
        );
        assert_eq!(
            EngineError::from(StateError::Storage("disk".into())).status(),
            SyncStatus::ServerError
        );
        assert_eq!(
            EngineError::from(BackendError::temporary("imap")).status(),
            SyncStatus::ServerErrorRetry
        );
    }

    #[test]
    fn cancelled() {
        assert!(EngineError::Cancelled.is_cancelled());
        assert!(!EngineError::from(BackendError::AuthenticationLost).is_cancelled());
    }
}
