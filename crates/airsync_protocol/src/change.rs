//! Item payloads and server-side change sets.

use crate::error::{ProtocolError, ProtocolResult};
use crate::options::{CollectionClass, SupportedFields};
use airsync_codec::{tags::airsync, CodecResult, Event, EventReader, EventWriter, Tag};
use serde::{Deserialize, Serialize};

/// Value of an item property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Present without content.
    Empty,
    /// Text content.
    Text(String),
    /// Nested properties (recurrences, exceptions, attendees, ...).
    Nested(Vec<Property>),
}

/// One property of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Property tag.
    pub tag: Tag,
    /// Property value.
    pub value: PropertyValue,
}

impl Property {
    /// Creates a text property.
    pub fn text(tag: Tag, text: impl Into<String>) -> Self {
        Self {
            tag,
            value: PropertyValue::Text(text.into()),
        }
    }
}

/// An item payload, tagged with the class of its collection.
///
/// Every class shares this representation; class specific structure such
/// as calendar exceptions is carried as nested properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationData {
    /// Class of the item.
    pub class: CollectionClass,
    /// Properties in wire order.
    pub properties: Vec<Property>,
}

impl ApplicationData {
    /// Creates an empty payload.
    pub fn new(class: CollectionClass) -> Self {
        Self {
            class,
            properties: Vec::new(),
        }
    }

    /// Adds a text property.
    pub fn with_text(mut self, tag: Tag, text: impl Into<String>) -> Self {
        self.set(tag, PropertyValue::Text(text.into()));
        self
    }

    /// Returns a property value.
    pub fn get(&self, tag: Tag) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| p.tag == tag)
            .map(|p| &p.value)
    }

    /// Returns a text property.
    pub fn text(&self, tag: Tag) -> Option<&str> {
        match self.get(tag) {
            Some(PropertyValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Sets a property, replacing any previous value.
    pub fn set(&mut self, tag: Tag, value: PropertyValue) {
        match self.properties.iter_mut().find(|p| p.tag == tag) {
            Some(existing) => existing.value = value,
            None => self.properties.push(Property { tag, value }),
        }
    }

    /// Applies a client change on top of the current server version.
    ///
    /// Properties the client sent replace the server's. Properties the
    /// client omitted are kept when ghosted and dropped otherwise.
    pub fn apply_change(&self, change: &ApplicationData, supported: &SupportedFields) -> Self {
        let mut merged = ApplicationData::new(self.class);
        for property in &self.properties {
            if change.get(property.tag).is_none() && supported.is_ghosted(property.tag) {
                merged.properties.push(property.clone());
            }
        }
        for property in &change.properties {
            merged.set(property.tag, property.value.clone());
        }
        merged
    }

    /// Decodes the body of an `ApplicationData` element whose start event
    /// was just consumed.
    pub fn decode(
        reader: &mut EventReader,
        class: CollectionClass,
        empty: bool,
    ) -> ProtocolResult<Self> {
        let properties = if empty {
            Vec::new()
        } else {
            decode_properties(reader)?
        };
        Ok(Self { class, properties })
    }

    /// Writes this payload as an `ApplicationData` element.
    pub fn encode(&self, writer: &mut EventWriter) -> CodecResult<()> {
        writer.start(airsync::APPLICATION_DATA);
        encode_properties(writer, &self.properties)?;
        writer.end()
    }
}

fn decode_properties(reader: &mut EventReader) -> ProtocolResult<Vec<Property>> {
    let mut properties = Vec::new();
    loop {
        match reader.next_event()? {
            Event::End => return Ok(properties),
            Event::Start { tag, empty: true } => properties.push(Property {
                tag,
                value: PropertyValue::Empty,
            }),
            Event::Start { tag, empty: false } => {
                let value = match reader.content() {
                    Some(text) => {
                        reader.end_tag()?;
                        PropertyValue::Text(text)
                    }
                    None => PropertyValue::Nested(decode_properties(reader)?),
                };
                properties.push(Property { tag, value });
            }
            Event::Content(_) => {
                return Err(ProtocolError::malformed(
                    "unexpected content between item properties",
                ))
            }
        }
    }
}

fn encode_properties(writer: &mut EventWriter, properties: &[Property]) -> CodecResult<()> {
    for property in properties {
        match &property.value {
            PropertyValue::Empty => writer.empty(property.tag),
            PropertyValue::Text(text) => writer.leaf(property.tag, text.clone()),
            PropertyValue::Nested(children) => {
                writer.start(property.tag);
                encode_properties(writer, children)?;
                writer.end()?;
            }
        }
    }
    Ok(())
}

/// Kind of a server-side change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// New item.
    Add,
    /// Modified item.
    Change,
    /// Flag or read-state change only.
    Flags,
    /// Item deleted.
    Delete,
    /// Item left the filter window; remove from the device only.
    SoftDelete,
}

/// A single backend change for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Server item id.
    pub server_id: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Item payload (adds and changes).
    pub data: Option<ApplicationData>,
    /// Backend modification sequence of the change.
    pub stamp: u64,
}

impl Change {
    /// Creates an add.
    pub fn add(server_id: impl Into<String>, data: ApplicationData, stamp: u64) -> Self {
        Self {
            server_id: server_id.into(),
            kind: ChangeKind::Add,
            data: Some(data),
            stamp,
        }
    }

    /// Creates a modification.
    pub fn change(server_id: impl Into<String>, data: ApplicationData, stamp: u64) -> Self {
        Self {
            server_id: server_id.into(),
            kind: ChangeKind::Change,
            data: Some(data),
            stamp,
        }
    }

    /// Creates a deletion.
    pub fn delete(server_id: impl Into<String>, stamp: u64) -> Self {
        Self {
            server_id: server_id.into(),
            kind: ChangeKind::Delete,
            data: None,
            stamp,
        }
    }

    /// Creates a soft deletion.
    pub fn soft_delete(server_id: impl Into<String>, stamp: u64) -> Self {
        Self {
            server_id: server_id.into(),
            kind: ChangeKind::SoftDelete,
            data: None,
            stamp,
        }
    }

    /// Writes this change as a Commands child element.
    pub fn encode(&self, writer: &mut EventWriter) -> CodecResult<()> {
        let tag = match self.kind {
            ChangeKind::Add => airsync::ADD,
            ChangeKind::Change | ChangeKind::Flags => airsync::CHANGE,
            ChangeKind::Delete => airsync::DELETE,
            ChangeKind::SoftDelete => airsync::SOFT_DELETE,
        };
        writer.start(tag);
        writer.leaf(airsync::SERVER_ID, self.server_id.clone());
        if let Some(data) = &self.data {
            data.encode(writer)?;
        }
        writer.end()
    }
}

/// Ordered backend changes for one collection since a baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Changes in backend order.
    pub changes: Vec<Change>,
    /// Backend stamp this set is current to.
    pub stamp: u64,
    /// More changes exist beyond this page.
    pub more_available: bool,
}

impl ChangeSet {
    /// Creates a change set.
    pub fn new(changes: Vec<Change>, stamp: u64) -> Self {
        Self {
            changes,
            stamp,
            more_available: false,
        }
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Splits off the first `limit` changes as a page.
    ///
    /// The returned page is flagged when changes remain in `self`.
    pub fn take_page(&mut self, limit: usize) -> ChangeSet {
        let rest = if limit < self.changes.len() {
            self.changes.split_off(limit)
        } else {
            Vec::new()
        };
        let page = std::mem::replace(&mut self.changes, rest);
        ChangeSet {
            changes: page,
            stamp: self.stamp,
            more_available: !self.changes.is_empty(),
        }
    }
}
