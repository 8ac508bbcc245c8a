//! Error types for the event codec.

use crate::tag::Tag;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while reading or writing an event stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The stream ended while more events were required.
    #[error("unexpected end of event stream")]
    UnexpectedEnd,

    /// A start tag other than the required one was found.
    #[error("expected start of {expected}, found {found}")]
    UnexpectedTag {
        /// Tag the caller required.
        expected: Tag,
        /// Description of the event actually found.
        found: String,
    },

    /// An event of the wrong kind was found.
    #[error("invalid event stream: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// Start and end tags do not pair up.
    #[error("unbalanced event stream: {open} element(s) still open")]
    Unbalanced {
        /// Number of elements left open.
        open: usize,
    },
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an unexpected tag error.
    pub fn unexpected_tag(expected: Tag, found: impl Into<String>) -> Self {
        Self::UnexpectedTag {
            expected,
            found: found.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::airsync;

    #[test]
    fn error_messages() {
        let err = CodecError::unexpected_tag(airsync::SYNC, "end tag");
        assert_eq!(err.to_string(), "expected start of 00:05, found end tag");

        let err = CodecError::Unbalanced { open: 2 };
        assert!(err.to_string().contains("2 element(s)"));
    }
}
