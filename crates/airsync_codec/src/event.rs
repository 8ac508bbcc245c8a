//! Decoded stream events.

use crate::tag::Tag;
use std::fmt;

/// A single event of a tag/content stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Start of an element. Empty elements have no matching [`Event::End`].
    Start {
        /// Element tag.
        tag: Tag,
        /// Whether the element has no content and no end event.
        empty: bool,
    },
    /// End of the innermost open element.
    End,
    /// Text content of the innermost open element.
    Content(String),
}

impl Event {
    /// Creates a start event for a non-empty element.
    pub fn start(tag: Tag) -> Self {
        Self::Start { tag, empty: false }
    }

    /// Creates a start event for an empty element.
    pub fn empty(tag: Tag) -> Self {
        Self::Start { tag, empty: true }
    }

    /// Creates a content event.
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content(text.into())
    }

    /// Returns the tag if this is a start event.
    pub fn start_tag(&self) -> Option<Tag> {
        match self {
            Self::Start { tag, .. } => Some(*tag),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { tag, empty: false } => write!(f, "start {tag}"),
            Self::Start { tag, empty: true } => write!(f, "empty {tag}"),
            Self::End => write!(f, "end tag"),
            Self::Content(_) => write!(f, "content"),
        }
    }
}
