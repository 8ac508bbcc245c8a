//! In-memory state store.

use crate::cache::SyncCache;
use crate::error::{StateError, StateResult};
use crate::state::CollectionState;
use crate::store::StateStore;
use airsync_protocol::SyncKey;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Lineage {
    id: Option<Uuid>,
    latest: u64,
    snapshots: BTreeMap<u64, Vec<u8>>,
}

#[derive(Debug, Default)]
struct StoredCache {
    generation: u64,
    bytes: Vec<u8>,
}

/// A [`StateStore`] keeping CBOR snapshots in memory.
///
/// Every load decodes a fresh copy, so callers never share state with the
/// store.
///
/// # Example
///
/// ```rust
/// use airsync_protocol::SyncKey;
/// use airsync_state::{CollectionState, MemoryStateStore, StateStore};
///
/// let store = MemoryStateStore::new();
/// let key = store.new_sync_key(&SyncKey::Initial);
/// store
///     .commit("dev1", "inbox", &SyncKey::Initial, &key, &CollectionState::default())
///     .unwrap();
/// assert!(store.load_state("dev1", "inbox", &key).is_ok());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    lineages: RwLock<HashMap<(String, String), Lineage>>,
    caches: RwLock<HashMap<String, StoredCache>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored snapshots for a collection.
    pub fn snapshot_count(&self, device: &str, collection_id: &str) -> usize {
        self.lineages
            .read()
            .get(&(device.to_string(), collection_id.to_string()))
            .map_or(0, |l| l.snapshots.len())
    }
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StateError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    ciborium::from_reader(bytes).map_err(|e| StateError::Serialization(e.to_string()))
}

fn slot(device: &str, collection_id: &str) -> (String, String) {
    (device.to_string(), collection_id.to_string())
}

impl StateStore for MemoryStateStore {
    fn load_state(
        &self,
        device: &str,
        collection_id: &str,
        key: &SyncKey,
    ) -> StateResult<CollectionState> {
        let SyncKey::Issued { lineage, counter } = key else {
            return Ok(CollectionState::default());
        };
        let lineages = self.lineages.read();
        let Some(stored) = lineages.get(&slot(device, collection_id)) else {
            return Err(StateError::gone(collection_id, key));
        };
        if stored.id != Some(*lineage) {
            return Err(StateError::gone(collection_id, key));
        }
        match stored.snapshots.get(counter) {
            Some(bytes) => decode(bytes),
            None if *counter < stored.latest => Err(StateError::stale(collection_id, key)),
            None => Err(StateError::gone(collection_id, key)),
        }
    }

    fn commit(
        &self,
        device: &str,
        collection_id: &str,
        previous: &SyncKey,
        next: &SyncKey,
        state: &CollectionState,
    ) -> StateResult<()> {
        let SyncKey::Issued { lineage, counter } = next else {
            return Err(StateError::InvalidTransition {
                previous: previous.to_string(),
                next: next.to_string(),
            });
        };
        if !next.follows(previous) {
            return Err(StateError::InvalidTransition {
                previous: previous.to_string(),
                next: next.to_string(),
            });
        }
        let bytes = encode(state)?;

        let mut lineages = self.lineages.write();
        let stored = lineages.entry(slot(device, collection_id)).or_default();
        match previous {
            SyncKey::Initial => {
                *stored = Lineage {
                    id: Some(*lineage),
                    latest: 0,
                    snapshots: BTreeMap::new(),
                };
            }
            SyncKey::Issued {
                counter: previous_counter,
                ..
            } => {
                if stored.id != Some(*lineage)
                    || stored.snapshots.remove(previous_counter).is_none()
                {
                    return Err(StateError::gone(collection_id, previous));
                }
            }
        }
        stored.snapshots.insert(*counter, bytes);
        stored.latest = *counter;
        debug!(device, collection = collection_id, %previous, %next, "committed sync state");
        Ok(())
    }

    fn update_sync_stamp(
        &self,
        device: &str,
        collection_id: &str,
        key: &SyncKey,
        baseline: u64,
    ) -> StateResult<()> {
        let SyncKey::Issued { lineage, counter } = key else {
            return Ok(());
        };
        let mut lineages = self.lineages.write();
        let bytes = lineages
            .get_mut(&slot(device, collection_id))
            .filter(|stored| stored.id == Some(*lineage))
            .and_then(|stored| stored.snapshots.get_mut(counter))
            .ok_or_else(|| StateError::gone(collection_id, key))?;
        let mut state: CollectionState = decode(bytes.as_slice())?;
        state.baseline = baseline;
        state.prune_mirrored();
        *bytes = encode(&state)?;
        Ok(())
    }

    fn remove_state(&self, device: &str, collection_id: &str, key: &SyncKey) -> StateResult<()> {
        let Some(lineage) = key.lineage() else {
            return Ok(());
        };
        let mut lineages = self.lineages.write();
        let slot = slot(device, collection_id);
        if lineages.get(&slot).is_some_and(|stored| stored.id == Some(lineage)) {
            lineages.remove(&slot);
            debug!(device, collection = collection_id, %key, "removed sync state lineage");
        }
        Ok(())
    }

    fn load_cache(&self, device: &str) -> StateResult<SyncCache> {
        match self.caches.read().get(device) {
            Some(stored) => {
                let mut cache: SyncCache = decode(&stored.bytes)?;
                cache.generation = stored.generation;
                Ok(cache)
            }
            None => Ok(SyncCache::default()),
        }
    }

    fn cache_generation(&self, device: &str) -> StateResult<u64> {
        Ok(self.caches.read().get(device).map_or(0, |c| c.generation))
    }

    fn save_cache(&self, device: &str, cache: &mut SyncCache) -> StateResult<()> {
        let bytes = encode(cache)?;
        let mut caches = self.caches.write();
        let stored = caches.entry(device.to_string()).or_default();
        if stored.generation != cache.generation {
            return Err(StateError::CacheStale {
                device: device.to_string(),
            });
        }
        stored.generation += 1;
        stored.bytes = bytes;
        cache.generation = stored.generation;
        Ok(())
    }
}
