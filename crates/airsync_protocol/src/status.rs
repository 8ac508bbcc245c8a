//! Sync status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code carried by a Sync response, globally or per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// The exchange succeeded.
    Success,
    /// Protocol version mismatch.
    VersionMismatch,
    /// The sync key is unknown or superseded; resync from key `0`.
    KeyMismatch,
    /// The request was malformed.
    ProtocolError,
    /// Unexpected server failure.
    ServerError,
    /// The item was rejected by the backend.
    Invalid,
    /// The item conflicted with a server-side change.
    Conflict,
    /// The item does not exist.
    NotFound,
    /// The folder hierarchy must be resynchronized first.
    FolderSyncRequired,
    /// The request lacks information the server needs.
    RequestIncomplete,
    /// Heartbeat or wait interval out of range.
    InvalidHeartbeat,
    /// Transient server failure; retry the same request.
    ServerErrorRetry,
}

impl SyncStatus {
    /// Returns the numeric wire code.
    pub fn code(self) -> u16 {
        match self {
            Self::Success => 1,
            Self::VersionMismatch => 2,
            Self::KeyMismatch => 3,
            Self::ProtocolError => 4,
            Self::ServerError => 5,
            Self::Invalid => 6,
            Self::Conflict => 7,
            Self::NotFound => 8,
            Self::FolderSyncRequired => 12,
            Self::RequestIncomplete => 13,
            Self::InvalidHeartbeat => 14,
            Self::ServerErrorRetry => 111,
        }
    }

    /// Parses a numeric wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => Self::Success,
            2 => Self::VersionMismatch,
            3 => Self::KeyMismatch,
            4 => Self::ProtocolError,
            5 => Self::ServerError,
            6 => Self::Invalid,
            7 => Self::Conflict,
            8 => Self::NotFound,
            12 => Self::FolderSyncRequired,
            13 => Self::RequestIncomplete,
            14 => Self::InvalidHeartbeat,
            111 => Self::ServerErrorRetry,
            _ => return None,
        })
    }

    /// Returns true for [`SyncStatus::Success`].
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Returns true if the device may retry the same request unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ServerErrorRetry)
    }

    /// Returns true if the device must restart the collection from key `0`
    /// or rerun the hierarchy sync.
    pub fn requires_resync(self) -> bool {
        matches!(self, Self::KeyMismatch | Self::FolderSyncRequired)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SyncStatus::Success.code(), 1);
        assert_eq!(SyncStatus::KeyMismatch.code(), 3);
        assert_eq!(SyncStatus::FolderSyncRequired.code(), 12);
        assert_eq!(SyncStatus::InvalidHeartbeat.code(), 14);
        assert_eq!(SyncStatus::ServerErrorRetry.code(), 111);
    }

    #[test]
    fn from_code_inverts_code() {
        for code in [1, 2, 3, 4, 5, 6, 7, 8, 12, 13, 14, 111] {
            let status = SyncStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(SyncStatus::from_code(9), None);
    }

    #[test]
    fn classification() {
        assert!(SyncStatus::ServerErrorRetry.is_retryable());
        assert!(!SyncStatus::ServerError.is_retryable());
        assert!(SyncStatus::KeyMismatch.requires_resync());
        assert!(!SyncStatus::NotFound.requires_resync());
    }
}
