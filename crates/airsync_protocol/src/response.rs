//! Typed Sync response.

use crate::change::{ApplicationData, Change};
use crate::options::CollectionClass;
use crate::status::SyncStatus;
use crate::sync_key::SyncKey;
use crate::version::ProtocolVersion;
use airsync_codec::tags::airsync;
use airsync_codec::{CodecResult, Event, EventWriter};

/// Reply to a client Add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddReply {
    /// Client temporary id.
    pub client_id: String,
    /// Item class, echoed when the Add carried one.
    pub class: Option<CollectionClass>,
    /// Assigned server id, absent on failure.
    pub server_id: Option<String>,
    /// Outcome.
    pub status: SyncStatus,
}

/// Reply to a client Fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReply {
    /// Server item id.
    pub server_id: String,
    /// Outcome.
    pub status: SyncStatus,
    /// The item, when found.
    pub data: Option<ApplicationData>,
}

/// Replies section of a collection response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replies {
    /// Failed modifications.
    pub modify_failures: Vec<(String, SyncStatus)>,
    /// Items the server modified while importing (16.0 and later).
    pub modified: Vec<String>,
    /// Add results.
    pub adds: Vec<AddReply>,
    /// Removed ids the backend did not find.
    pub missing: Vec<String>,
    /// Fetch results.
    pub fetches: Vec<FetchReply>,
}

impl Replies {
    /// Returns true if nothing needs to be sent.
    pub fn is_empty(&self) -> bool {
        self.modify_failures.is_empty()
            && self.modified.is_empty()
            && self.adds.is_empty()
            && self.missing.is_empty()
            && self.fetches.is_empty()
    }

    fn encode(&self, writer: &mut EventWriter, version: ProtocolVersion) -> CodecResult<()> {
        writer.start(airsync::RESPONSES);
        for (server_id, status) in &self.modify_failures {
            writer.start(airsync::CHANGE);
            writer.leaf(airsync::SERVER_ID, server_id.clone());
            writer.leaf(airsync::STATUS, status.to_string());
            writer.end()?;
        }
        if version.features().modified_replies {
            for server_id in &self.modified {
                writer.start(airsync::CHANGE);
                writer.leaf(airsync::SERVER_ID, server_id.clone());
                writer.leaf(airsync::STATUS, SyncStatus::Success.to_string());
                writer.end()?;
            }
        }
        for add in &self.adds {
            writer.start(airsync::ADD);
            if let Some(class) = add.class {
                writer.leaf(airsync::CLASS, class.as_str());
            }
            writer.leaf(airsync::CLIENT_ID, add.client_id.clone());
            if let Some(server_id) = &add.server_id {
                writer.leaf(airsync::SERVER_ID, server_id.clone());
            }
            writer.leaf(airsync::STATUS, add.status.to_string());
            writer.end()?;
        }
        for server_id in &self.missing {
            writer.start(airsync::DELETE);
            writer.leaf(airsync::SERVER_ID, server_id.clone());
            writer.leaf(airsync::STATUS, SyncStatus::NotFound.to_string());
            writer.end()?;
        }
        for fetch in &self.fetches {
            writer.start(airsync::FETCH);
            writer.leaf(airsync::SERVER_ID, fetch.server_id.clone());
            writer.leaf(airsync::STATUS, fetch.status.to_string());
            if let Some(data) = &fetch.data {
                data.encode(writer)?;
            }
            writer.end()?;
        }
        writer.end()
    }
}

/// One collection of a Sync response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionResponse {
    /// Class, sent only to versions that expect it.
    pub class: Option<CollectionClass>,
    /// Key the device must present next.
    pub sync_key: SyncKey,
    /// Backend folder id.
    pub collection_id: String,
    /// Collection status.
    pub status: SyncStatus,
    /// More server changes are waiting.
    pub more_available: bool,
    /// Server changes.
    pub commands: Vec<Change>,
    /// Replies to client operations.
    pub replies: Replies,
}

impl CollectionResponse {
    /// Creates a response carrying only a key and a status.
    pub fn status_only(
        collection_id: impl Into<String>,
        sync_key: SyncKey,
        status: SyncStatus,
    ) -> Self {
        Self {
            class: None,
            sync_key,
            collection_id: collection_id.into(),
            status,
            more_available: false,
            commands: Vec::new(),
            replies: Replies::default(),
        }
    }

    fn encode(&self, writer: &mut EventWriter, version: ProtocolVersion) -> CodecResult<()> {
        writer.start(airsync::COLLECTION);
        if let (Some(class), true) = (self.class, version.features().class_in_response) {
            writer.leaf(airsync::CLASS, class.as_str());
        }
        writer.leaf(airsync::SYNC_KEY, self.sync_key.to_string());
        writer.leaf(airsync::COLLECTION_ID, self.collection_id.clone());
        writer.leaf(airsync::STATUS, self.status.to_string());
        if self.more_available {
            writer.empty(airsync::MORE_AVAILABLE);
        }
        if !self.commands.is_empty() {
            writer.start(airsync::COMMANDS);
            for change in &self.commands {
                change.encode(writer)?;
            }
            writer.end()?;
        }
        if !self.replies.is_empty() {
            self.replies.encode(writer, version)?;
        }
        writer.end()
    }
}

/// A Sync response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    /// Global status.
    pub status: SyncStatus,
    /// Allowed maximum, sent with [`SyncStatus::InvalidHeartbeat`].
    pub limit: Option<u32>,
    /// Per-collection results.
    pub collections: Vec<CollectionResponse>,
    /// Nothing changed during a long-poll; the body is omitted.
    pub empty: bool,
}

impl SyncResponse {
    /// Creates a successful response.
    pub fn success(collections: Vec<CollectionResponse>) -> Self {
        Self {
            status: SyncStatus::Success,
            limit: None,
            collections,
            empty: false,
        }
    }

    /// Creates a global error response.
    pub fn error(status: SyncStatus) -> Self {
        Self {
            status,
            limit: None,
            collections: Vec::new(),
            empty: false,
        }
    }

    /// Creates a global error response carrying a limit.
    pub fn error_with_limit(status: SyncStatus, limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::error(status)
        }
    }

    /// Creates the empty response.
    pub fn empty() -> Self {
        Self {
            empty: true,
            ..Self::success(Vec::new())
        }
    }

    /// Returns true for the empty response.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Finds a collection by id.
    pub fn collection(&self, id: &str) -> Option<&CollectionResponse> {
        self.collections.iter().find(|c| c.collection_id == id)
    }

    /// Writes the response.
    pub fn encode(&self, writer: &mut EventWriter, version: ProtocolVersion) -> CodecResult<()> {
        if self.empty {
            return Ok(());
        }
        writer.start(airsync::SYNC);
        writer.leaf(airsync::STATUS, self.status.to_string());
        if let Some(limit) = self.limit {
            writer.leaf(airsync::LIMIT, limit.to_string());
        }
        if self.status.is_success() {
            writer.start(airsync::COLLECTIONS);
            for collection in &self.collections {
                collection.encode(writer, version)?;
            }
            writer.end()?;
        }
        writer.end()
    }

    /// Encodes the response into events.
    pub fn to_events(&self, version: ProtocolVersion) -> CodecResult<Vec<Event>> {
        let mut writer = EventWriter::new();
        self.encode(&mut writer, version)?;
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airsync_codec::tags::email;
    use airsync_codec::EventReader;

    fn collection() -> CollectionResponse {
        let mut response = CollectionResponse::status_only(
            "inbox",
            SyncKey::Initial.next(),
            SyncStatus::Success,
        );
        response.class = Some(CollectionClass::Email);
        response.more_available = true;
        response.commands.push(Change::add(
            "m1",
            ApplicationData::new(CollectionClass::Email).with_text(email::SUBJECT, "Hi"),
            1,
        ));
        response.replies.missing.push("m9".into());
        response
    }

    #[test]
    fn empty_response_has_no_events() {
        let events = SyncResponse::empty().to_events(ProtocolVersion::V14_1).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn error_carries_limit() {
        let response = SyncResponse::error_with_limit(SyncStatus::InvalidHeartbeat, 3540);
        let mut reader = EventReader::new(response.to_events(ProtocolVersion::V14_1).unwrap());
        reader.expect_start(airsync::SYNC).unwrap();
        assert_eq!(reader.read_leaf(airsync::STATUS).unwrap().unwrap(), "14");
        assert_eq!(reader.read_leaf(airsync::LIMIT).unwrap().unwrap(), "3540");
        reader.end_tag().unwrap();
        assert!(reader.is_empty());
    }

    #[test]
    fn class_only_for_legacy_versions() {
        let response = SyncResponse::success(vec![collection()]);

        let mut reader = EventReader::new(response.to_events(ProtocolVersion::V12_0).unwrap());
        reader.expect_start(airsync::SYNC).unwrap();
        reader.read_leaf(airsync::STATUS).unwrap();
        reader.expect_start(airsync::COLLECTIONS).unwrap();
        reader.expect_start(airsync::COLLECTION).unwrap();
        assert_eq!(reader.read_leaf(airsync::CLASS).unwrap().unwrap(), "Email");

        let mut reader = EventReader::new(response.to_events(ProtocolVersion::V14_0).unwrap());
        reader.expect_start(airsync::SYNC).unwrap();
        reader.read_leaf(airsync::STATUS).unwrap();
        reader.expect_start(airsync::COLLECTIONS).unwrap();
        reader.expect_start(airsync::COLLECTION).unwrap();
        assert_eq!(reader.peek_start(), Some(airsync::SYNC_KEY));
    }

    #[test]
    fn collection_element_order() {
        let response = SyncResponse::success(vec![collection()]);
        let mut reader = EventReader::new(response.to_events(ProtocolVersion::V14_1).unwrap());
        reader.expect_start(airsync::SYNC).unwrap();
        reader.read_leaf(airsync::STATUS).unwrap();
        reader.expect_start(airsync::COLLECTIONS).unwrap();
        reader.expect_start(airsync::COLLECTION).unwrap();
        reader.read_leaf(airsync::SYNC_KEY).unwrap().unwrap();
        assert_eq!(
            reader.read_leaf(airsync::COLLECTION_ID).unwrap().unwrap(),
            "inbox"
        );
        assert_eq!(reader.read_leaf(airsync::STATUS).unwrap().unwrap(), "1");
        assert_eq!(reader.start_tag(airsync::MORE_AVAILABLE), Some(true));
        reader.expect_start(airsync::COMMANDS).unwrap();
        reader.skip_element(false).unwrap();
        reader.expect_start(airsync::RESPONSES).unwrap();
        reader.expect_start(airsync::DELETE).unwrap();
        assert_eq!(reader.read_leaf(airsync::SERVER_ID).unwrap().unwrap(), "m9");
        assert_eq!(reader.read_leaf(airsync::STATUS).unwrap().unwrap(), "8");
    }

    #[test]
    fn modified_replies_need_sixteen() {
        let mut replies = Replies::default();
        replies.modified.push("e1".into());

        let mut writer = EventWriter::new();
        replies.encode(&mut writer, ProtocolVersion::V14_1).unwrap();
        assert_eq!(writer.finish().unwrap().len(), 2);

        let mut writer = EventWriter::new();
        replies.encode(&mut writer, ProtocolVersion::V16_0).unwrap();
        assert!(writer.finish().unwrap().len() > 2);
    }
}
