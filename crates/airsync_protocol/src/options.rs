//! Collection classes and per-collection options.

use crate::error::{ProtocolError, ProtocolResult};
use airsync_codec::Tag;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data class of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CollectionClass {
    /// Mail folders.
    Email,
    /// Calendars.
    Calendar,
    /// Address books.
    Contacts,
    /// Task lists.
    Tasks,
    /// Notes.
    Notes,
    /// Text messages.
    Sms,
}

impl CollectionClass {
    /// Returns the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::Calendar => "Calendar",
            Self::Contacts => "Contacts",
            Self::Tasks => "Tasks",
            Self::Notes => "Notes",
            Self::Sms => "SMS",
        }
    }

    /// Parses a wire name.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        Ok(match raw {
            "Email" => Self::Email,
            "Calendar" => Self::Calendar,
            "Contacts" => Self::Contacts,
            "Tasks" => Self::Tasks,
            "Notes" => Self::Notes,
            "SMS" => Self::Sms,
            other => return Err(ProtocolError::invalid_value("Class", other)),
        })
    }
}

impl fmt::Display for CollectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-range restriction on exported items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterType(u8);

impl FilterType {
    /// No restriction.
    pub const ALL: FilterType = FilterType(0);
    /// One day back.
    pub const ONE_DAY: FilterType = FilterType(1);
    /// Three days back.
    pub const THREE_DAYS: FilterType = FilterType(2);
    /// One week back.
    pub const ONE_WEEK: FilterType = FilterType(3);
    /// Two weeks back.
    pub const TWO_WEEKS: FilterType = FilterType(4);
    /// One month back.
    pub const ONE_MONTH: FilterType = FilterType(5);
    /// Three months back.
    pub const THREE_MONTHS: FilterType = FilterType(6);
    /// Six months back.
    pub const SIX_MONTHS: FilterType = FilterType(7);
    /// Incomplete tasks only.
    pub const INCOMPLETE_TASKS: FilterType = FilterType(8);

    /// Parses a wire value.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        match raw.trim().parse::<u8>() {
            Ok(value) if value <= 8 => Ok(Self(value)),
            _ => Err(ProtocolError::invalid_value("FilterType", raw)),
        }
    }

    /// Returns the wire value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Returns the maximum item age in days, if the filter is time based.
    pub fn max_age_days(self) -> Option<u32> {
        match self.0 {
            1 => Some(1),
            2 => Some(3),
            3 => Some(7),
            4 => Some(14),
            5 => Some(30),
            6 => Some(90),
            7 => Some(180),
            _ => None,
        }
    }
}

impl Default for FilterType {
    fn default() -> Self {
        Self::ALL
    }
}

/// Which side wins when a client modification conflicts with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// The client's version overwrites the server's (wire `0`).
    OverwriteServer,
    /// The server's version is kept and sent back to the client (wire `1`).
    OverwriteClient,
}

impl ConflictPolicy {
    /// Parses a wire value.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        match raw.trim() {
            "0" => Ok(Self::OverwriteServer),
            "1" => Ok(Self::OverwriteClient),
            other => Err(ProtocolError::invalid_value("Conflict", other)),
        }
    }

    /// Returns the wire value.
    pub fn code(self) -> u8 {
        match self {
            Self::OverwriteServer => 0,
            Self::OverwriteClient => 1,
        }
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::OverwriteClient
    }
}

/// A body or body part preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPreference {
    /// Body type (1 plain, 2 HTML, 3 RTF, 4 MIME).
    pub body_type: u8,
    /// Maximum body size to send.
    pub truncation_size: Option<u32>,
    /// Send nothing unless the whole body fits.
    pub all_or_none: bool,
    /// Preview length.
    pub preview: Option<u32>,
}

impl BodyPreference {
    /// Creates a preference for a body type.
    pub fn new(body_type: u8) -> Self {
        Self {
            body_type,
            truncation_size: None,
            all_or_none: false,
            preview: None,
        }
    }

    /// Sets the truncation size.
    pub fn with_truncation(mut self, size: u32) -> Self {
        self.truncation_size = Some(size);
        self
    }
}

/// Sticky collection options.
///
/// Fields left `None` (or empty) were not sent and inherit the cached value
/// on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Time-range restriction.
    pub filter_type: Option<FilterType>,
    /// Conflict resolution policy.
    pub conflict: Option<ConflictPolicy>,
    /// Legacy truncation level.
    pub truncation: Option<u8>,
    /// Legacy RTF truncation level.
    pub rtf_truncation: Option<u8>,
    /// MIME support level.
    pub mime_support: Option<u8>,
    /// MIME truncation level.
    pub mime_truncation: Option<u8>,
    /// Maximum number of items (recipient information cache).
    pub max_items: Option<u32>,
    /// Body preferences by type.
    pub body_preferences: Vec<BodyPreference>,
    /// Body part preferences by type.
    pub body_part_preferences: Vec<BodyPreference>,
    /// Rights managed content supported.
    pub rights_management: Option<bool>,
}

impl CollectionOptions {
    /// Overwrites every field that `newer` carries.
    pub fn merge_from(&mut self, newer: &CollectionOptions) {
        if newer.filter_type.is_some() {
            self.filter_type = newer.filter_type;
        }
        if newer.conflict.is_some() {
            self.conflict = newer.conflict;
        }
        if newer.truncation.is_some() {
            self.truncation = newer.truncation;
        }
        if newer.rtf_truncation.is_some() {
            self.rtf_truncation = newer.rtf_truncation;
        }
        if newer.mime_support.is_some() {
            self.mime_support = newer.mime_support;
        }
        if newer.mime_truncation.is_some() {
            self.mime_truncation = newer.mime_truncation;
        }
        if newer.max_items.is_some() {
            self.max_items = newer.max_items;
        }
        if !newer.body_preferences.is_empty() {
            self.body_preferences = newer.body_preferences.clone();
        }
        if !newer.body_part_preferences.is_empty() {
            self.body_part_preferences = newer.body_part_preferences.clone();
        }
        if newer.rights_management.is_some() {
            self.rights_management = newer.rights_management;
        }
    }

    /// Returns the effective filter type.
    pub fn filter_type(&self) -> FilterType {
        self.filter_type.unwrap_or_default()
    }

    /// Returns the effective conflict policy.
    pub fn conflict(&self) -> ConflictPolicy {
        self.conflict.unwrap_or_default()
    }
}

/// Fields a client declared it supports (ghosting).
///
/// Properties outside the declared set are "ghosted": the server keeps
/// its value when the client sends a change without them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupportedFields {
    /// The client supports every field.
    All,
    /// The client supports only these tags.
    Only(Vec<Tag>),
}

impl SupportedFields {
    /// Builds the set from a list of tags; an empty list means all fields.
    pub fn from_tags(tags: Vec<Tag>) -> Self {
        if tags.is_empty() {
            Self::All
        } else {
            Self::Only(tags)
        }
    }

    /// Returns true if the server must preserve `tag` when absent from a
    /// client change.
    pub fn is_ghosted(&self, tag: Tag) -> bool {
        match self {
            Self::All => false,
            Self::Only(tags) => !tags.contains(&tag),
        }
    }
}
