//! Error types for the protocol crate.

use airsync_codec::CodecError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting a Sync request.
///
/// Every variant is structural: the request cannot be processed and the
/// device receives a protocol error status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Underlying event stream error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An element carried a value that could not be interpreted.
    #[error("invalid value for {element}: {value:?}")]
    InvalidValue {
        /// Element name.
        element: &'static str,
        /// Raw value received.
        value: String,
    },

    /// A required element was absent.
    #[error("missing required element: {0}")]
    MissingElement(&'static str),

    /// A sync key did not have the expected shape.
    #[error("invalid sync key: {0:?}")]
    InvalidSyncKey(String),

    /// Unsupported protocol version string.
    #[error("unknown protocol version: {0}")]
    UnknownVersion(String),

    /// The request violates a structural rule.
    #[error("malformed request: {message}")]
    Malformed {
        /// Description of the violation.
        message: String,
    },
}

impl ProtocolError {
    /// Create an invalid value error.
    pub fn invalid_value(element: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            element,
            value: value.into(),
        }
    }

    /// Create a malformed request error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}
