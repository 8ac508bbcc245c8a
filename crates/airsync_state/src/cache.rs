//! Per-device sync cache.

use airsync_protocol::{CollectionClass, CollectionOptions, SupportedFields, SyncKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sticky data remembered for one collection of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCollection {
    /// Collection class.
    pub class: Option<CollectionClass>,
    /// Last key confirmed to the device.
    pub sync_key: Option<SyncKey>,
    /// Last requested window size.
    pub window_size: Option<u32>,
    /// Sticky options.
    pub options: CollectionOptions,
    /// Sticky DeletesAsMoves flag.
    pub deletes_as_moves: Option<bool>,
    /// Sticky conversation mode flag.
    pub conversation_mode: Option<bool>,
    /// A long-poll saw changes that have not been exported yet.
    pub ping_change: bool,
}

/// Persisted state of one device across requests.
///
/// The store assigns `generation`; a save succeeds only when the cache
/// still has the generation it was loaded with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCache {
    /// Key of the last hierarchy sync, if one happened.
    pub hierarchy: Option<String>,
    /// Last heartbeat interval, in seconds.
    pub heartbeat_interval: Option<u32>,
    /// Last wait interval, in minutes.
    pub wait: Option<u32>,
    /// Global window size.
    pub window_size: Option<u32>,
    /// Unix time in milliseconds of the last normally completed Sync.
    pub last_sync_end_normal: Option<u64>,
    /// Collections by id.
    pub collections: BTreeMap<String, CachedCollection>,
    /// Ghosting declarations by class.
    pub supported: BTreeMap<CollectionClass, SupportedFields>,
    /// Freshness marker assigned by the store.
    #[serde(skip)]
    pub generation: u64,
}

impl SyncCache {
    /// Returns a cached collection.
    pub fn collection(&self, id: &str) -> Option<&CachedCollection> {
        self.collections.get(id)
    }

    /// Returns a cached collection, creating it if needed.
    pub fn collection_mut(&mut self, id: &str) -> &mut CachedCollection {
        self.collections.entry(id.to_string()).or_default()
    }

    /// Forgets a collection.
    pub fn remove_collection(&mut self, id: &str) {
        self.collections.remove(id);
    }

    /// Returns true if a hierarchy sync was recorded.
    pub fn has_hierarchy(&self) -> bool {
        self.hierarchy.is_some()
    }

    /// Records the heartbeat and wait preferences of a request.
    ///
    /// Sending one clears the other.
    pub fn set_long_poll(&mut self, heartbeat_interval: Option<u32>, wait: Option<u32>) {
        if heartbeat_interval.is_some() || wait.is_some() {
            self.heartbeat_interval = heartbeat_interval;
            self.wait = wait;
        }
    }

    /// Returns true if the collection carries a ping change flag.
    pub fn has_ping_change(&self, id: &str) -> bool {
        self.collection(id).is_some_and(|c| c.ping_change)
    }

    /// Flags a collection as changed during a long-poll.
    pub fn set_ping_change(&mut self, id: &str) {
        self.collection_mut(id).ping_change = true;
    }

    /// Records a collection's newly confirmed key and clears its ping flag.
    pub fn confirm_key(&mut self, id: &str, key: &SyncKey) {
        let collection = self.collection_mut(id);
        collection.sync_key = Some(key.clone());
        collection.ping_change = false;
    }

    /// Records the end of a normally completed Sync.
    pub fn mark_sync_end(&mut self) {
        self.last_sync_end_normal = Some(now_millis());
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
