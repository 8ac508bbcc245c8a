//! Backend data access trait.

use airsync_protocol::{
    ApplicationData, ChangeSet, CollectionClass, ConflictPolicy, FilterType, SupportedFields,
    SyncStatus,
};
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a [`SyncBackend`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The item does not exist.
    #[error("item not found: {0}")]
    NotFound(String),

    /// The backend refused the item.
    #[error("item rejected: {0}")]
    Rejected(String),

    /// The server copy changed and the conflict policy keeps it.
    #[error("conflicting server change for {0}")]
    Conflict(String),

    /// The folder no longer exists.
    #[error("folder gone: {0}")]
    FolderGone(String),

    /// Connectivity or other transient failure.
    #[error("temporary backend failure: {0}")]
    Temporary(String),

    /// The session lost its authorization.
    #[error("authentication lost")]
    AuthenticationLost,
}

impl BackendError {
    /// Create a temporary failure.
    pub fn temporary(message: impl Into<String>) -> Self {
        Self::Temporary(message.into())
    }

    /// Returns true if the same request may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns true if the whole session is affected.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::AuthenticationLost)
    }

    /// Status reported for a single item.
    pub fn item_status(&self) -> SyncStatus {
        match self {
            Self::NotFound(_) => SyncStatus::NotFound,
            Self::Rejected(_) => SyncStatus::Invalid,
            Self::Conflict(_) => SyncStatus::Conflict,
            Self::Temporary(_) => SyncStatus::ServerErrorRetry,
            Self::FolderGone(_) | Self::AuthenticationLost => SyncStatus::ServerError,
        }
    }

    /// Status reported for a whole collection.
    pub fn collection_status(&self) -> SyncStatus {
        match self {
            Self::FolderGone(_) => SyncStatus::FolderSyncRequired,
            Self::Temporary(_) => SyncStatus::ServerErrorRetry,
            _ => SyncStatus::ServerError,
        }
    }
}

/// Server id and stamp of an item written by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStamp {
    /// Server item id.
    pub server_id: String,
    /// Backend stamp of the write.
    pub stamp: u64,
}

/// Result of a modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyOutcome {
    /// Backend stamp of the write.
    pub stamp: u64,
    /// The stored item differs from what the device sent.
    pub server_modified: bool,
}

/// Result of a batched removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Items removed.
    pub removed: Vec<ItemStamp>,
    /// Ids the backend did not find.
    pub missing: Vec<String>,
}

/// Parameters of a modification.
#[derive(Debug, Clone)]
pub struct ModifyOptions<'a> {
    /// Conflict resolution policy of the collection.
    pub conflict: ConflictPolicy,
    /// Ghosting declaration of the device.
    pub supported: &'a SupportedFields,
    /// Stamp the device is current to.
    pub baseline: u64,
    /// Occurrence of a recurring item the change applies to.
    pub instance_id: Option<&'a str>,
}

/// Mail, calendar and contact storage as seen by the sync engine.
///
/// Implementations must be `Send + Sync`; one backend is shared by every
/// request. Stamps are backend modification sequence numbers: every write
/// returns the stamp it was recorded at, and change queries return changes
/// recorded after a baseline stamp.
pub trait SyncBackend: Send + Sync {
    /// Returns the class of a folder.
    fn collection_class(&self, collection_id: &str) -> BackendResult<CollectionClass>;

    /// Creates an item.
    fn add_item(&self, collection_id: &str, data: &ApplicationData) -> BackendResult<ItemStamp>;

    /// Modifies an item, or one occurrence of it when
    /// [`ModifyOptions::instance_id`] is set.
    fn modify_item(
        &self,
        collection_id: &str,
        server_id: &str,
        data: &ApplicationData,
        options: &ModifyOptions<'_>,
    ) -> BackendResult<ModifyOutcome>;

    /// Deletes items in one call.
    fn delete_items(&self, collection_id: &str, server_ids: &[String])
        -> BackendResult<RemoveOutcome>;

    /// Moves items to another folder in one call.
    fn move_items(
        &self,
        collection_id: &str,
        server_ids: &[String],
        destination: &str,
    ) -> BackendResult<RemoveOutcome>;

    /// Deletes one occurrence of a recurring item.
    fn delete_instance(
        &self,
        collection_id: &str,
        server_id: &str,
        instance_id: &str,
    ) -> BackendResult<u64>;

    /// Returns the folder deleted items of a class are moved to.
    fn waste_basket(&self, class: CollectionClass) -> Option<String>;

    /// Retrieves an item.
    fn fetch_item(&self, collection_id: &str, server_id: &str) -> BackendResult<ApplicationData>;

    /// Counts changes recorded after `baseline`.
    fn change_count(
        &self,
        collection_id: &str,
        baseline: u64,
        filter: FilterType,
    ) -> BackendResult<usize>;

    /// Lists changes recorded after `baseline`, oldest first.
    ///
    /// A zero baseline lists every item visible under `filter` as an add.
    fn changes_since(
        &self,
        collection_id: &str,
        baseline: u64,
        filter: FilterType,
    ) -> BackendResult<ChangeSet>;
}
