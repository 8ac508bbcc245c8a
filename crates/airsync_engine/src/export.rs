//! Building collection responses from server changes.

use crate::backend::{BackendError, BackendResult, SyncBackend};
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::registry::Collection;
use airsync_protocol::{
    Change, ChangeKind, ChangeSet, CollectionResponse, FetchReply, Replies, SyncStatus,
};
use airsync_state::{CollectionState, StateError, StateStore, SyncCache};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Items left to send in one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBudget {
    limit: u32,
    used: u32,
    exhausted: bool,
}

impl WindowBudget {
    /// Creates a budget of `limit` items.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: 0,
            exhausted: limit == 0,
        }
    }

    /// Items already sent.
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Items that may still be sent.
    pub fn remaining(&self) -> u32 {
        if self.exhausted {
            0
        } else {
            self.limit - self.used
        }
    }

    /// Returns true once no further collection may send items.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn consume(&mut self, items: u32) {
        self.used = self.used.saturating_add(items).min(self.limit);
        if self.used >= self.limit {
            self.exhausted = true;
        }
    }

    fn exhaust(&mut self) {
        self.exhausted = true;
    }
}

/// Computes, pages and commits server changes for each collection.
pub struct Exporter<'a, S, B> {
    ctx: &'a RequestContext,
    config: &'a EngineConfig,
    store: &'a S,
    backend: &'a B,
}

impl<'a, S: StateStore, B: SyncBackend> Exporter<'a, S, B> {
    /// Creates an exporter for one request.
    pub fn new(
        ctx: &'a RequestContext,
        config: &'a EngineConfig,
        store: &'a S,
        backend: &'a B,
    ) -> Self {
        Self {
            ctx,
            config,
            store,
            backend,
        }
    }

    /// Builds the response of one collection and commits its next key.
    ///
    /// Collection failures are reported in the returned response; only a
    /// lost session is returned as an error.
    pub fn export(
        &self,
        cache: &mut SyncCache,
        collection: &mut Collection,
        budget: &mut WindowBudget,
    ) -> BackendResult<CollectionResponse> {
        let mut response = CollectionResponse::status_only(
            &collection.id,
            collection.sync_key.clone(),
            collection.status,
        );
        response.class = Some(collection.class);
        if !collection.is_ok() {
            return Ok(response);
        }

        if budget.is_exhausted() && !collection.imported_changes && !collection.has_replies() {
            debug!(collection = %collection.id, "window exhausted, skipping collection");
            response.more_available = true;
            return Ok(response);
        }

        let forced = collection.imported_changes && !collection.get_changes;
        let mut change_count = 0;
        if collection.get_changes || forced {
            let pending = match self.pending_changes(collection) {
                Ok(pending) => pending,
                Err(e) if e.is_session_error() => return Err(e),
                Err(e) => {
                    warn!(collection = %collection.id, error = %e, "change query failed");
                    if matches!(e, BackendError::FolderGone(_)) {
                        cache.remove_collection(&collection.id);
                    }
                    collection.fail(e.collection_status());
                    response.status = collection.status;
                    return Ok(response);
                }
            };
            change_count = pending.len();
            if forced {
                debug!(collection = %collection.id, change_count, "changes kept for the next exchange");
                collection.state.queue(pending);
            } else {
                let mut page = pending;
                let mut size = page.len().min(self.config.collection_window(collection.window_size) as usize);
                let remaining = budget.remaining() as usize;
                if size > remaining && budget.used() > 0 {
                    budget.exhaust();
                    size = 0;
                } else {
                    size = size.min(remaining);
                }
                let rest = page.split_off(size);
                response.more_available = !rest.is_empty();
                budget.consume(u32::try_from(size).unwrap_or(u32::MAX));
                collection.state.queue(rest);
                for change in &page {
                    collection.state.track(change);
                }
                response.commands = page;
            }
        }

        let key = collection.sync_key.clone();
        let advance = collection.imported_changes
            || change_count > 0
            || key.is_initial()
            || key.counter() == 1
            || !collection.fetch_ids.is_empty()
            || !collection.client_ids.is_empty()
            || collection.ping_change
            || cache.has_ping_change(&collection.id);

        response.replies = self.replies(collection)?;

        if !collection.state.has_pending() {
            collection.state.prune_mirrored();
        }
        let device = self.ctx.device_id.as_str();
        if advance {
            let next = self.store.new_sync_key(&key);
            match self
                .store
                .commit(device, &collection.id, &key, &next, &collection.state)
            {
                Ok(()) => {
                    cache.confirm_key(&collection.id, &next);
                    collection.ping_change = false;
                    response.sync_key = next;
                }
                Err(e) => {
                    warn!(collection = %collection.id, error = %e, "commit failed");
                    let status = match e {
                        StateError::Storage(_) | StateError::Serialization(_) => {
                            SyncStatus::ServerError
                        }
                        _ => SyncStatus::KeyMismatch,
                    };
                    collection.fail(status);
                    let mut failed =
                        CollectionResponse::status_only(&collection.id, key, status);
                    failed.class = Some(collection.class);
                    return Ok(failed);
                }
            }
        } else if let Err(e) =
            self.store
                .update_sync_stamp(device, &collection.id, &key, collection.state.baseline)
        {
            warn!(collection = %collection.id, error = %e, "cannot refresh sync stamp");
        }

        debug!(
            collection = %collection.id,
            sent = response.commands.len(),
            more_available = response.more_available,
            key = %response.sync_key,
            "exported server changes"
        );
        Ok(response)
    }

    fn pending_changes(&self, collection: &mut Collection) -> BackendResult<Vec<Change>> {
        let filter = collection.options.filter_type();
        let refresh = collection.force_refresh || collection.state.filter_type != filter;
        let state = &mut collection.state;
        if state.has_pending() && !refresh {
            return Ok(std::mem::take(&mut state.pending));
        }

        let previous = state.baseline;
        let changes = if refresh {
            debug!(collection = %collection.id, ?filter, "filter changed, reconciling device items");
            state.pending.clear();
            let snapshot = self.backend.changes_since(&collection.id, 0, filter)?;
            state.baseline = snapshot.stamp.max(previous);
            reconcile(state, snapshot)
        } else {
            let set = self.backend.changes_since(&collection.id, previous, filter)?;
            state.baseline = set.stamp.max(previous);
            set.changes.into_iter().filter(|c| !state.is_echo(c)).collect()
        };
        state.filter_type = filter;
        Ok(changes)
    }

    fn replies(&self, collection: &mut Collection) -> BackendResult<Replies> {
        let mut fetches = Vec::with_capacity(collection.fetch_ids.len());
        for server_id in std::mem::take(&mut collection.fetch_ids) {
            let reply = match self.backend.fetch_item(&collection.id, &server_id) {
                Ok(data) => FetchReply {
                    server_id,
                    status: SyncStatus::Success,
                    data: Some(data),
                },
                Err(e) if e.is_session_error() => return Err(e),
                Err(e) => FetchReply {
                    server_id,
                    status: e.item_status(),
                    data: None,
                },
            };
            fetches.push(reply);
        }
        Ok(Replies {
            modify_failures: std::mem::take(&mut collection.import_failures),
            modified: std::mem::take(&mut collection.modified_ids),
            adds: std::mem::take(&mut collection.client_ids),
            missing: std::mem::take(&mut collection.missing),
            fetches,
        })
    }
}

/// Diffs the items visible under the current filter against the items the
/// device holds.
///
/// Visible items the device lacks become adds, newer versions of held
/// items become changes, and held items that are no longer visible are
/// soft deleted.
fn reconcile(state: &CollectionState, snapshot: ChangeSet) -> Vec<Change> {
    let mut visible = BTreeSet::new();
    let mut changes = Vec::new();
    for mut change in snapshot.changes {
        if matches!(change.kind, ChangeKind::Delete | ChangeKind::SoftDelete) {
            continue;
        }
        visible.insert(change.server_id.clone());
        match state.held.get(&change.server_id) {
            None => {
                change.kind = ChangeKind::Add;
                changes.push(change);
            }
            Some(stamp) if *stamp < change.stamp => {
                change.kind = ChangeKind::Change;
                changes.push(change);
            }
            Some(_) => {}
        }
    }
    changes.extend(
        state
            .held
            .keys()
            .filter(|id| !visible.contains(*id))
            .map(|id| Change::soft_delete(id.clone(), snapshot.stamp)),
    );
    changes.sort_by_key(|c| c.stamp);
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use airsync_codec::tags::email;
    use airsync_protocol::{
        ApplicationData, ChangeKind, CollectionClass, FilterType, ProtocolVersion, SyncKey,
    };
    use airsync_state::MemoryStateStore;

    struct Fixture {
        ctx: RequestContext,
        config: EngineConfig,
        store: MemoryStateStore,
        backend: MemoryBackend,
        cache: SyncCache,
    }

    impl Fixture {
        fn new(items: usize) -> Self {
            let backend = MemoryBackend::new();
            for folder in ["inbox", "sent"] {
                backend.add_folder(folder, CollectionClass::Email);
                for i in 0..items {
                    let data = ApplicationData::new(CollectionClass::Email)
                        .with_text(email::SUBJECT, format!("{folder} {i}"));
                    backend.insert(folder, data).unwrap();
                }
            }
            Self {
                ctx: RequestContext::new("dev1", ProtocolVersion::V14_1),
                config: EngineConfig::default(),
                store: MemoryStateStore::new(),
                backend,
                cache: SyncCache::default(),
            }
        }

        fn resume(&self, key: &SyncKey, filter: FilterType) -> Collection {
            let mut collection = Collection::new("inbox", CollectionClass::Email, key.clone());
            collection.state = self.store.load_state("dev1", "inbox", key).unwrap();
            collection.options.filter_type = Some(filter);
            collection.window_size = 100;
            collection
        }

        fn export(&mut self, collection: &mut Collection, budget: &mut WindowBudget) -> CollectionResponse {
            Exporter::new(&self.ctx, &self.config, &self.store, &self.backend)
                .export(&mut self.cache, collection, budget)
                .unwrap()
        }
    }

    fn initial(id: &str, window: u32) -> Collection {
        let mut collection = Collection::new(id, CollectionClass::Email, SyncKey::Initial);
        collection.window_size = window;
        collection
    }

    #[test]
    fn budget_accounting() {
        let mut budget = WindowBudget::new(10);
        budget.consume(4);
        assert_eq!(budget.remaining(), 6);
        budget.consume(6);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn initial_key_sends_snapshot() {
        let mut fx = Fixture::new(3);
        let mut inbox = initial("inbox", 100);
        let mut budget = WindowBudget::new(512);
        let response = fx.export(&mut inbox, &mut budget);
        assert_eq!(response.status, SyncStatus::Success);
        assert_eq!(response.commands.len(), 3);
        assert!(response.commands.iter().all(|c| c.kind == ChangeKind::Add));
        assert_eq!(response.sync_key.counter(), 1);
        assert!(!response.more_available);
        assert_eq!(
            fx.cache.collection("inbox").unwrap().sync_key,
            Some(response.sync_key.clone())
        );
    }

    #[test]
    fn collection_window_pages_changes() {
        let mut fx = Fixture::new(5);
        let mut inbox = initial("inbox", 2);
        let mut budget = WindowBudget::new(512);
        let first = fx.export(&mut inbox, &mut budget);
        assert_eq!(first.commands.len(), 2);
        assert!(first.more_available);

        let state = fx
            .store
            .load_state("dev1", "inbox", &first.sync_key)
            .unwrap();
        assert_eq!(state.pending.len(), 3);
    }

    #[test]
    fn global_window_is_shared() {
        let mut fx = Fixture::new(3);
        let mut budget = WindowBudget::new(4);
        let mut inbox = initial("inbox", 100);
        let mut sent = initial("sent", 100);

        let first = fx.export(&mut inbox, &mut budget);
        assert_eq!(first.commands.len(), 3);
        let second = fx.export(&mut sent, &mut budget);
        assert!(second.commands.is_empty());
        assert!(second.more_available);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn exhausted_budget_skips_with_current_key() {
        let mut fx = Fixture::new(1);
        let mut budget = WindowBudget::new(1);
        budget.consume(1);
        let key = SyncKey::Initial.next().next();
        let mut inbox = Collection::new("inbox", CollectionClass::Email, key.clone());
        let response = fx.export(&mut inbox, &mut budget);
        assert!(response.more_available);
        assert_eq!(response.sync_key, key);
    }

    #[test]
    fn own_imports_are_not_echoed() {
        let mut fx = Fixture::new(0);
        let mut inbox = initial("inbox", 100);
        let mut budget = WindowBudget::new(512);
        let created = fx
            .backend
            .add_item(
                "inbox",
                &ApplicationData::new(CollectionClass::Email).with_text(email::SUBJECT, "mine"),
            )
            .unwrap();
        inbox.state.mirror(created.server_id, created.stamp);
        inbox.imported_changes = true;

        let response = fx.export(&mut inbox, &mut budget);
        assert!(response.commands.is_empty());
    }

    #[test]
    fn forced_export_keeps_changes_pending() {
        let mut fx = Fixture::new(2);
        let mut inbox = initial("inbox", 100);
        inbox.get_changes = false;
        inbox.imported_changes = true;
        let mut budget = WindowBudget::new(512);

        let response = fx.export(&mut inbox, &mut budget);
        assert!(response.commands.is_empty());
        let state = fx
            .store
            .load_state("dev1", "inbox", &response.sync_key)
            .unwrap();
        assert_eq!(state.pending.len(), 2);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn filter_change_recomputes_pending() {
        let mut fx = Fixture::new(0);
        for age in [1, 20, 2] {
            let data = ApplicationData::new(CollectionClass::Email).with_text(email::SUBJECT, "x");
            fx.backend.insert_aged("inbox", data, age).unwrap();
        }
        let mut inbox = initial("inbox", 1);
        let mut budget = WindowBudget::new(512);
        let first = fx.export(&mut inbox, &mut budget);
        assert_eq!(first.commands.len(), 1);

        let mut next = fx.resume(&first.sync_key, FilterType::ONE_WEEK);
        let second = fx.export(&mut next, &mut WindowBudget::new(512));
        assert_eq!(second.commands.len(), 1);
        assert_eq!(second.commands[0].kind, ChangeKind::Add);
        assert!(!second.more_available);
    }

    #[test]
    fn filter_change_reconciles_device_items() {
        let mut fx = Fixture::new(0);
        let data = ApplicationData::new(CollectionClass::Email).with_text(email::SUBJECT, "x");
        let recent = fx.backend.insert_aged("inbox", data.clone(), 1).unwrap();
        let old = fx.backend.insert_aged("inbox", data, 20).unwrap();
        let mut inbox = initial("inbox", 100);
        let first = fx.export(&mut inbox, &mut WindowBudget::new(512));
        assert_eq!(first.commands.len(), 2);

        let mut narrowed = fx.resume(&first.sync_key, FilterType::ONE_WEEK);
        let second = fx.export(&mut narrowed, &mut WindowBudget::new(512));
        assert_eq!(second.commands.len(), 1);
        assert_eq!(second.commands[0].server_id, old);
        assert_eq!(second.commands[0].kind, ChangeKind::SoftDelete);
        assert!(second.sync_key.follows(&first.sync_key));

        let edited = ApplicationData::new(CollectionClass::Email).with_text(email::SUBJECT, "y");
        fx.backend.update("inbox", &recent, edited).unwrap();
        let mut widened = fx.resume(&second.sync_key, FilterType::ALL);
        let third = fx.export(&mut widened, &mut WindowBudget::new(512));
        let sent: Vec<_> = third
            .commands
            .iter()
            .map(|c| (c.server_id.as_str(), c.kind))
            .collect();
        assert_eq!(
            sent,
            vec![
                (old.as_str(), ChangeKind::Add),
                (recent.as_str(), ChangeKind::Change)
            ]
        );

        let mut unchanged = fx.resume(&third.sync_key, FilterType::ALL);
        let fourth = fx.export(&mut unchanged, &mut WindowBudget::new(512));
        assert!(fourth.commands.is_empty());
    }

    #[test]
    fn fetch_replies_and_key_advance() {
        let mut fx = Fixture::new(1);
        let id = fx.backend.item_ids("inbox").remove(0);
        let first = SyncKey::Initial.next();
        let key = first.next();
        fx.store
            .commit("dev1", "inbox", &SyncKey::Initial, &first, &Default::default())
            .unwrap();
        fx.store
            .commit("dev1", "inbox", &first, &key, &Default::default())
            .unwrap();

        let mut inbox = Collection::new("inbox", CollectionClass::Email, key.clone());
        inbox.get_changes = false;
        inbox.fetch_ids = vec![id, "ghost".into()];
        let response = fx.export(&mut inbox, &mut WindowBudget::new(512));
        assert_eq!(response.replies.fetches.len(), 2);
        assert_eq!(response.replies.fetches[0].status, SyncStatus::Success);
        assert_eq!(response.replies.fetches[1].status, SyncStatus::NotFound);
        assert!(response.sync_key.follows(&key));
    }

    #[test]
    fn folder_gone_reports_folder_sync() {
        let mut fx = Fixture::new(0);
        fx.backend.remove_folder("inbox");
        fx.cache.collection_mut("inbox");
        let mut inbox = initial("inbox", 100);
        let response = fx.export(&mut inbox, &mut WindowBudget::new(512));
        assert_eq!(response.status, SyncStatus::FolderSyncRequired);
        assert!(fx.cache.collection("inbox").is_none());
    }
}
