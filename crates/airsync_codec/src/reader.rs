//! Pull reader over a decoded event stream.

use crate::error::{CodecError, CodecResult};
use crate::event::Event;
use crate::tag::Tag;

/// A pull reader over a sequence of events.
///
/// Callers drive it as a dispatch loop: peek the next start tag, handle
/// the element it names, and stop at the end event of the enclosing
/// element.
#[derive(Debug, Clone, Default)]
pub struct EventReader {
    events: Vec<Event>,
    pos: usize,
}

impl EventReader {
    /// Creates a reader over the given events.
    pub fn new(events: Vec<Event>) -> Self {
        Self { events, pos: 0 }
    }

    /// Returns true if every event has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.events.len()
    }

    /// Returns the next event without consuming it.
    pub fn peek(&self) -> Option<&Event> {
        self.events.get(self.pos)
    }

    /// Returns the tag of the next event if it is a start event.
    pub fn peek_start(&self) -> Option<Tag> {
        self.peek().and_then(Event::start_tag)
    }

    /// Returns true if the next event is an end event.
    pub fn at_end(&self) -> bool {
        matches!(self.peek(), Some(Event::End))
    }

    /// Consumes and returns the next event.
    pub fn next_event(&mut self) -> CodecResult<Event> {
        let event = self
            .events
            .get(self.pos)
            .cloned()
            .ok_or(CodecError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(event)
    }

    /// Consumes a start event for `tag` if it is next.
    ///
    /// Returns `Some(empty)` when consumed, `None` otherwise.
    pub fn start_tag(&mut self, tag: Tag) -> Option<bool> {
        match self.peek() {
            Some(Event::Start { tag: t, empty }) if *t == tag => {
                let empty = *empty;
                self.pos += 1;
                Some(empty)
            }
            _ => None,
        }
    }

    /// Consumes a start event for `tag`, failing if something else is next.
    pub fn expect_start(&mut self, tag: Tag) -> CodecResult<bool> {
        if let Some(empty) = self.start_tag(tag) {
            return Ok(empty);
        }
        let found = match self.peek() {
            Some(event) => event.to_string(),
            None => "end of stream".to_string(),
        };
        Err(CodecError::unexpected_tag(tag, found))
    }

    /// Consumes an end event.
    pub fn end_tag(&mut self) -> CodecResult<()> {
        match self.next_event()? {
            Event::End => Ok(()),
            other => Err(CodecError::invalid_structure(format!(
                "expected end tag, found {other}"
            ))),
        }
    }

    /// Consumes a content event if it is next.
    pub fn content(&mut self) -> Option<String> {
        match self.peek() {
            Some(Event::Content(text)) => {
                let text = text.clone();
                self.pos += 1;
                Some(text)
            }
            _ => None,
        }
    }

    /// Reads the text of an element whose start event was just consumed.
    ///
    /// Empty elements yield an empty string and consume nothing more.
    pub fn element_text(&mut self, empty: bool) -> CodecResult<String> {
        if empty {
            return Ok(String::new());
        }
        let text = self.content().unwrap_or_default();
        self.end_tag()?;
        Ok(text)
    }

    /// Reads a whole `<tag>text</tag>` element if it is next.
    pub fn read_leaf(&mut self, tag: Tag) -> CodecResult<Option<String>> {
        match self.start_tag(tag) {
            Some(empty) => self.element_text(empty).map(Some),
            None => Ok(None),
        }
    }

    /// Skips the rest of an element whose start event was just consumed.
    pub fn skip_element(&mut self, empty: bool) -> CodecResult<()> {
        if empty {
            return Ok(());
        }
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_event()? {
                Event::Start { empty: false, .. } => depth += 1,
                Event::End => depth -= 1,
                Event::Start { empty: true, .. } | Event::Content(_) => {}
            }
        }
        Ok(())
    }

    /// Skips the next element, whatever it is.
    pub fn skip_next(&mut self) -> CodecResult<()> {
        match self.next_event()? {
            Event::Start { empty, .. } => self.skip_element(empty),
            Event::Content(_) => Ok(()),
            Event::End => Err(CodecError::invalid_structure("unexpected end tag")),
        }
    }
}

impl From<Vec<Event>> for EventReader {
    fn from(events: Vec<Event>) -> Self {
        Self::new(events)
    }
}
