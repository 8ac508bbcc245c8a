//! Event stream writer.

use crate::error::{CodecError, CodecResult};
use crate::event::Event;
use crate::tag::Tag;

/// Builds an event stream, tracking open elements.
#[derive(Debug, Default)]
pub struct EventWriter {
    events: Vec<Event>,
    open: Vec<Tag>,
}

impl EventWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an element.
    pub fn start(&mut self, tag: Tag) {
        self.events.push(Event::start(tag));
        self.open.push(tag);
    }

    /// Writes an empty element.
    pub fn empty(&mut self, tag: Tag) {
        self.events.push(Event::empty(tag));
    }

    /// Writes text content into the innermost open element.
    pub fn content(&mut self, text: impl Into<String>) {
        self.events.push(Event::content(text));
    }

    /// Closes the innermost open element.
    pub fn end(&mut self) -> CodecResult<()> {
        if self.open.pop().is_none() {
            return Err(CodecError::invalid_structure(
                "end tag without open element",
            ));
        }
        self.events.push(Event::End);
        Ok(())
    }

    /// Writes `<tag>text</tag>`.
    pub fn leaf(&mut self, tag: Tag, text: impl Into<String>) {
        self.events.push(Event::start(tag));
        self.events.push(Event::content(text));
        self.events.push(Event::End);
    }

    /// Returns the number of currently open elements.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Returns the events, failing if any element is still open.
    pub fn finish(self) -> CodecResult<Vec<Event>> {
        if !self.open.is_empty() {
            return Err(CodecError::Unbalanced {
                open: self.open.len(),
            });
        }
        Ok(self.events)
    }
}
