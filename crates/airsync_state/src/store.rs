//! State store trait definition.

use crate::cache::SyncCache;
use crate::error::StateResult;
use crate::state::CollectionState;
use airsync_protocol::SyncKey;

/// Persistence for sync keys, their snapshots, and device caches.
///
/// The sync engine is the only writer. Every key-space failure is
/// reported as a recoverable [`crate::StateError`].
///
/// # Invariants
///
/// - `load_state` for [`SyncKey::Initial`] always succeeds with an empty
///   snapshot
/// - after `commit(previous, next)`, loading `previous` fails
/// - `save_cache` fails with `CacheStale` when another save happened since
///   the cache was loaded
///
/// # Implementors
///
/// - [`crate::MemoryStateStore`] - For testing and embedding
pub trait StateStore: Send + Sync {
    /// Loads the snapshot stored under `key`.
    ///
    /// # Errors
    ///
    /// `Gone` if the key is unknown, `Stale` if it was superseded.
    fn load_state(
        &self,
        device: &str,
        collection_id: &str,
        key: &SyncKey,
    ) -> StateResult<CollectionState>;

    /// Returns the key that follows `previous`.
    fn new_sync_key(&self, previous: &SyncKey) -> SyncKey {
        previous.next()
    }

    /// Stores `state` under `next` and makes `previous` unreachable.
    ///
    /// # Errors
    ///
    /// `Gone` if `previous` is no longer current, `InvalidTransition` if
    /// `next` does not follow it.
    fn commit(
        &self,
        device: &str,
        collection_id: &str,
        previous: &SyncKey,
        next: &SyncKey,
        state: &CollectionState,
    ) -> StateResult<()>;

    /// Moves the baseline of a key that stays valid.
    fn update_sync_stamp(
        &self,
        device: &str,
        collection_id: &str,
        key: &SyncKey,
        baseline: u64,
    ) -> StateResult<()>;

    /// Invalidates `key` and every key of its lineage.
    fn remove_state(&self, device: &str, collection_id: &str, key: &SyncKey) -> StateResult<()>;

    /// Loads the device cache; a device never seen gets an empty cache.
    fn load_cache(&self, device: &str) -> StateResult<SyncCache>;

    /// Returns the current generation of the device cache.
    fn cache_generation(&self, device: &str) -> StateResult<u64>;

    /// Saves the device cache and advances its generation.
    ///
    /// # Errors
    ///
    /// `CacheStale` if the stored generation differs from `cache.generation`.
    fn save_cache(&self, device: &str, cache: &mut SyncCache) -> StateResult<()>;

    /// Records a completed hierarchy sync.
    fn set_hierarchy(&self, device: &str, key: &str) -> StateResult<()> {
        let mut cache = self.load_cache(device)?;
        cache.hierarchy = Some(key.to_string());
        self.save_cache(device, &mut cache)
    }
}
