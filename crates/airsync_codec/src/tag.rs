//! Protocol tag identifiers.
//!
//! A tag is the pair `(codepage, token)` packed as `(page << 8) | token`,
//! the same numbering the binary XML token tables use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A protocol tag identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(u16);

impl Tag {
    /// Creates a tag from its codepage and token.
    pub const fn new(page: u8, token: u8) -> Self {
        Self(((page as u16) << 8) | token as u16)
    }

    /// Creates a tag from its packed representation.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the packed representation.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Returns the codepage.
    pub const fn page(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Returns the token within the codepage.
    pub const fn token(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}", self.page(), self.token())
    }
}

/// Codepage numbers.
pub mod pages {
    /// AirSync (Sync command).
    pub const AIRSYNC: u8 = 0x00;
    /// Contacts.
    pub const CONTACTS: u8 = 0x01;
    /// Email.
    pub const EMAIL: u8 = 0x02;
    /// Calendar.
    pub const CALENDAR: u8 = 0x04;
    /// Tasks.
    pub const TASKS: u8 = 0x09;
    /// AirSyncBase.
    pub const AIRSYNCBASE: u8 = 0x11;
    /// Notes.
    pub const NOTES: u8 = 0x17;
    /// Rights management.
    pub const RIGHTS_MANAGEMENT: u8 = 0x18;
}

/// Tag constants, grouped by codepage.
pub mod tags {
    /// AirSync codepage.
    #[allow(missing_docs)]
    pub mod airsync {
        use crate::tag::{pages::AIRSYNC as P, Tag};

        pub const SYNC: Tag = Tag::new(P, 0x05);
        pub const RESPONSES: Tag = Tag::new(P, 0x06);
        pub const ADD: Tag = Tag::new(P, 0x07);
        pub const CHANGE: Tag = Tag::new(P, 0x08);
        pub const DELETE: Tag = Tag::new(P, 0x09);
        pub const FETCH: Tag = Tag::new(P, 0x0A);
        pub const SYNC_KEY: Tag = Tag::new(P, 0x0B);
        pub const CLIENT_ID: Tag = Tag::new(P, 0x0C);
        pub const SERVER_ID: Tag = Tag::new(P, 0x0D);
        pub const STATUS: Tag = Tag::new(P, 0x0E);
        pub const COLLECTION: Tag = Tag::new(P, 0x0F);
        pub const CLASS: Tag = Tag::new(P, 0x10);
        pub const COLLECTION_ID: Tag = Tag::new(P, 0x12);
        pub const GET_CHANGES: Tag = Tag::new(P, 0x13);
        pub const MORE_AVAILABLE: Tag = Tag::new(P, 0x14);
        pub const WINDOW_SIZE: Tag = Tag::new(P, 0x15);
        pub const COMMANDS: Tag = Tag::new(P, 0x16);
        pub const OPTIONS: Tag = Tag::new(P, 0x17);
        pub const FILTER_TYPE: Tag = Tag::new(P, 0x18);
        pub const TRUNCATION: Tag = Tag::new(P, 0x19);
        pub const RTF_TRUNCATION: Tag = Tag::new(P, 0x1A);
        pub const CONFLICT: Tag = Tag::new(P, 0x1B);
        pub const COLLECTIONS: Tag = Tag::new(P, 0x1C);
        pub const APPLICATION_DATA: Tag = Tag::new(P, 0x1D);
        pub const DELETES_AS_MOVES: Tag = Tag::new(P, 0x1E);
        pub const SUPPORTED: Tag = Tag::new(P, 0x20);
        pub const SOFT_DELETE: Tag = Tag::new(P, 0x21);
        pub const MIME_SUPPORT: Tag = Tag::new(P, 0x22);
        pub const MIME_TRUNCATION: Tag = Tag::new(P, 0x23);
        pub const WAIT: Tag = Tag::new(P, 0x24);
        pub const LIMIT: Tag = Tag::new(P, 0x25);
        pub const PARTIAL: Tag = Tag::new(P, 0x26);
        pub const CONVERSATION_MODE: Tag = Tag::new(P, 0x27);
        pub const MAX_ITEMS: Tag = Tag::new(P, 0x28);
        pub const HEARTBEAT_INTERVAL: Tag = Tag::new(P, 0x29);
    }

    /// AirSyncBase codepage.
    #[allow(missing_docs)]
    pub mod airsyncbase {
        use crate::tag::{pages::AIRSYNCBASE as P, Tag};

        pub const BODY_PREFERENCE: Tag = Tag::new(P, 0x05);
        pub const TYPE: Tag = Tag::new(P, 0x06);
        pub const TRUNCATION_SIZE: Tag = Tag::new(P, 0x07);
        pub const ALL_OR_NONE: Tag = Tag::new(P, 0x08);
        pub const PREVIEW: Tag = Tag::new(P, 0x19);
        pub const BODY_PART_PREFERENCE: Tag = Tag::new(P, 0x1A);
        pub const INSTANCE_ID: Tag = Tag::new(P, 0x2E);
    }

    /// Rights management codepage.
    #[allow(missing_docs)]
    pub mod rights_management {
        use crate::tag::{pages::RIGHTS_MANAGEMENT as P, Tag};

        pub const RIGHTS_MANAGEMENT_SUPPORT: Tag = Tag::new(P, 0x05);
    }

    /// Email codepage (subset used by item payloads).
    #[allow(missing_docs)]
    pub mod email {
        use crate::tag::{pages::EMAIL as P, Tag};

        pub const TO: Tag = Tag::new(P, 0x16);
        pub const SUBJECT: Tag = Tag::new(P, 0x14);
        pub const READ: Tag = Tag::new(P, 0x15);
        pub const FROM: Tag = Tag::new(P, 0x18);
        pub const FLAG: Tag = Tag::new(P, 0x3A);
    }

    /// Contacts codepage (subset used by item payloads).
    #[allow(missing_docs)]
    pub mod contacts {
        use crate::tag::{pages::CONTACTS as P, Tag};

        pub const EMAIL1_ADDRESS: Tag = Tag::new(P, 0x1B);
        pub const FILE_AS: Tag = Tag::new(P, 0x1E);
        pub const FIRST_NAME: Tag = Tag::new(P, 0x1F);
        pub const LAST_NAME: Tag = Tag::new(P, 0x29);
    }

    /// Calendar codepage (subset used by item payloads).
    #[allow(missing_docs)]
    pub mod calendar {
        use crate::tag::{pages::CALENDAR as P, Tag};

        pub const SUBJECT: Tag = Tag::new(P, 0x26);
        pub const START_TIME: Tag = Tag::new(P, 0x27);
        pub const END_TIME: Tag = Tag::new(P, 0x12);
        pub const EXCEPTIONS: Tag = Tag::new(P, 0x14);
        pub const EXCEPTION: Tag = Tag::new(P, 0x13);
        pub const DELETED: Tag = Tag::new(P, 0x15);
    }
}
