//! Collections taking part in one request.

use crate::backend::SyncBackend;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use airsync_protocol::{
    AddReply, CollectionClass, CollectionOptions, CollectionRequest, Command, SupportedFields,
    SyncKey, SyncRequest, SyncResponse, SyncStatus, MAX_HEARTBEAT, MAX_WAIT_MINUTES,
    MAX_WINDOW_SIZE,
};
use airsync_state::{CachedCollection, CollectionState, SyncCache};
use std::time::Duration;
use tracing::{debug, warn};

/// A request refused before any collection was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// Global status.
    pub status: SyncStatus,
    /// Limit reported with the status.
    pub limit: Option<u32>,
}

impl Rejection {
    fn new(status: SyncStatus) -> Self {
        Self {
            status,
            limit: None,
        }
    }

    fn with_limit(status: SyncStatus, limit: u32) -> Self {
        Self {
            status,
            limit: Some(limit),
        }
    }

    /// Builds the global error response.
    pub fn into_response(self) -> SyncResponse {
        match self.limit {
            Some(limit) => SyncResponse::error_with_limit(self.status, limit),
            None => SyncResponse::error(self.status),
        }
    }
}

/// One collection of a request with the results gathered while handling it.
#[derive(Debug, Clone)]
pub struct Collection {
    /// Backend folder id.
    pub id: String,
    /// Collection class.
    pub class: CollectionClass,
    /// Key the device presented.
    pub sync_key: SyncKey,
    /// Collection status; anything but success skips import and export.
    pub status: SyncStatus,
    /// Window size after clamping.
    pub window_size: u32,
    /// The device asked for server changes.
    pub get_changes: bool,
    /// Deleted items go to the waste basket.
    pub deletes_as_moves: bool,
    /// Conversation mode.
    pub conversation_mode: bool,
    /// Effective sticky options.
    pub options: CollectionOptions,
    /// Ghosting declaration for the class.
    pub supported: SupportedFields,
    /// Pending changes must be recomputed.
    pub force_refresh: bool,
    /// Client operations in request order.
    pub commands: Vec<Command>,
    /// Snapshot loaded for `sync_key`.
    pub state: CollectionState,
    /// An import was attempted.
    pub imported_changes: bool,
    /// Add results by client id; a rejected add has no server id.
    pub client_ids: Vec<AddReply>,
    /// Removed ids the backend did not find.
    pub missing: Vec<String>,
    /// Failed modifications.
    pub import_failures: Vec<(String, SyncStatus)>,
    /// Items the server changed while importing.
    pub modified_ids: Vec<String>,
    /// Items the device asked to fetch.
    pub fetch_ids: Vec<String>,
    /// A long-poll saw changes in this collection.
    pub ping_change: bool,
}

impl Collection {
    /// Creates a collection with default settings.
    pub fn new(id: impl Into<String>, class: CollectionClass, sync_key: SyncKey) -> Self {
        Self {
            id: id.into(),
            class,
            sync_key,
            status: SyncStatus::Success,
            window_size: MAX_WINDOW_SIZE,
            get_changes: true,
            deletes_as_moves: true,
            conversation_mode: false,
            options: CollectionOptions::default(),
            supported: SupportedFields::All,
            force_refresh: false,
            commands: Vec::new(),
            state: CollectionState::default(),
            imported_changes: false,
            client_ids: Vec::new(),
            missing: Vec::new(),
            import_failures: Vec::new(),
            modified_ids: Vec::new(),
            fetch_ids: Vec::new(),
            ping_change: false,
        }
    }

    fn failed(id: impl Into<String>, class: CollectionClass, status: SyncStatus) -> Self {
        let mut collection = Self::new(id, class, SyncKey::Initial);
        collection.status = status;
        collection
    }

    fn from_cache(
        id: &str,
        cached: &CachedCollection,
        key: SyncKey,
        class: CollectionClass,
        cache: &SyncCache,
        config: &EngineConfig,
    ) -> Self {
        let mut collection = Self::new(id, class, key);
        collection.window_size = clamp_window_size(cached.window_size, config.default_window_size);
        collection.options = cached.options.clone();
        collection.deletes_as_moves = cached.deletes_as_moves.unwrap_or(true);
        collection.conversation_mode = cached.conversation_mode.unwrap_or(false);
        collection.supported = supported_for(cache, class);
        collection.ping_change = cached.ping_change;
        collection
    }

    /// Returns true while the collection can still be processed.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Marks the collection as failed.
    pub fn fail(&mut self, status: SyncStatus) {
        debug!(collection = %self.id, %status, "collection failed");
        self.status = status;
    }

    /// Returns true if the response carries replies to client operations.
    pub fn has_replies(&self) -> bool {
        !self.client_ids.is_empty()
            || !self.missing.is_empty()
            || !self.import_failures.is_empty()
            || !self.modified_ids.is_empty()
            || !self.fetch_ids.is_empty()
    }

    /// Applies the sticky cache entry of the collection.
    fn remember(&self, cache: &mut SyncCache) {
        let cached = cache.collection_mut(&self.id);
        cached.class = Some(self.class);
        cached.window_size = Some(self.window_size);
        cached.options = self.options.clone();
        cached.deletes_as_moves = Some(self.deletes_as_moves);
        cached.conversation_mode = Some(self.conversation_mode);
    }
}

/// Clamps a requested window size to `1..=512`.
///
/// Zero and out of range values fall back to the maximum; an absent value
/// falls back to `fallback`.
pub fn clamp_window_size(requested: Option<u32>, fallback: u32) -> u32 {
    match requested {
        Some(size) if (1..=MAX_WINDOW_SIZE).contains(&size) => size,
        Some(size) => {
            warn!(size, "window size out of range, using {MAX_WINDOW_SIZE}");
            MAX_WINDOW_SIZE
        }
        None => fallback.clamp(1, MAX_WINDOW_SIZE),
    }
}

fn supported_for(cache: &SyncCache, class: CollectionClass) -> SupportedFields {
    cache
        .supported
        .get(&class)
        .cloned()
        .unwrap_or(SupportedFields::All)
}

/// Collections of one request, merged with the device cache.
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    collections: Vec<Collection>,
    window_size: u32,
    heartbeat_interval: Option<u32>,
    wait: Option<u32>,
    replayed: bool,
}

impl CollectionRegistry {
    /// Validates the long-poll parameters of a request.
    pub fn check_long_poll(
        request: &SyncRequest,
        ctx: &RequestContext,
    ) -> Result<(), Rejection> {
        if ctx.version.features().looping_sync
            && request.heartbeat_interval.is_some()
            && request.wait.is_some()
        {
            return Err(Rejection::new(SyncStatus::ProtocolError));
        }
        if request.heartbeat_interval.is_some_and(|hb| hb > MAX_HEARTBEAT) {
            return Err(Rejection::with_limit(
                SyncStatus::InvalidHeartbeat,
                MAX_HEARTBEAT,
            ));
        }
        if request.wait.is_some_and(|wait| wait > MAX_WAIT_MINUTES) {
            return Err(Rejection::with_limit(
                SyncStatus::InvalidHeartbeat,
                MAX_WAIT_MINUTES,
            ));
        }
        Ok(())
    }

    /// Builds the registry for a request and updates the sticky cache.
    pub fn from_request<B: SyncBackend>(
        ctx: &RequestContext,
        config: &EngineConfig,
        backend: &B,
        cache: &mut SyncCache,
        request: &SyncRequest,
    ) -> Result<Self, Rejection> {
        Self::check_long_poll(request, ctx)?;
        if request.partial && cache.collections.is_empty() {
            debug!(device = %ctx.device_id, "partial sync without cached collections");
            return Err(Rejection::new(SyncStatus::RequestIncomplete));
        }

        if let Some(size) = request.window_size {
            cache.window_size = Some(clamp_window_size(Some(size), MAX_WINDOW_SIZE));
        }
        let asked_long_poll = request.heartbeat_interval.is_some() || request.wait.is_some();
        cache.set_long_poll(request.heartbeat_interval, request.wait);

        let mut collections = Vec::with_capacity(request.collections.len());
        for wire in &request.collections {
            collections.push(Self::merge(ctx, config, backend, cache, wire)?);
        }

        if request.partial {
            for (id, cached) in &cache.collections {
                if collections.iter().any(|c| &c.id == id) {
                    continue;
                }
                if let (Some(key), Some(class)) = (&cached.sync_key, cached.class) {
                    collections.push(Collection::from_cache(
                        id,
                        cached,
                        key.clone(),
                        class,
                        cache,
                        config,
                    ));
                }
            }
        }

        let (heartbeat_interval, wait) = if request.partial || asked_long_poll {
            (cache.heartbeat_interval, cache.wait)
        } else {
            (None, None)
        };

        Ok(Self {
            collections,
            window_size: Self::global_window(config, cache),
            heartbeat_interval,
            wait,
            replayed: false,
        })
    }

    /// Rebuilds the previous request from the cache.
    pub fn from_cache(
        ctx: &RequestContext,
        config: &EngineConfig,
        cache: &SyncCache,
    ) -> Result<Self, Rejection> {
        if !ctx.version.features().empty_request {
            return Err(Rejection::new(SyncStatus::RequestIncomplete));
        }
        let collections: Vec<Collection> = cache
            .collections
            .iter()
            .filter_map(|(id, cached)| {
                let key = cached.sync_key.clone()?;
                let class = cached.class?;
                Some(Collection::from_cache(id, cached, key, class, cache, config))
            })
            .collect();
        if collections.is_empty() {
            debug!(device = %ctx.device_id, "empty request without cached collections");
            return Err(Rejection::new(SyncStatus::RequestIncomplete));
        }
        Ok(Self {
            collections,
            window_size: Self::global_window(config, cache),
            heartbeat_interval: cache.heartbeat_interval,
            wait: cache.wait,
            replayed: true,
        })
    }

    fn global_window(config: &EngineConfig, cache: &SyncCache) -> u32 {
        match config.max_request_window_size {
            Some(size) => size.max(1),
            None => cache.window_size.unwrap_or(MAX_WINDOW_SIZE),
        }
    }

    fn merge<B: SyncBackend>(
        ctx: &RequestContext,
        config: &EngineConfig,
        backend: &B,
        cache: &mut SyncCache,
        wire: &CollectionRequest,
    ) -> Result<Collection, Rejection> {
        let cached = cache.collection(&wire.id).cloned().unwrap_or_default();

        let class = match wire.class.or(cached.class) {
            Some(class) => class,
            None => match backend.collection_class(&wire.id) {
                Ok(class) => class,
                Err(e) => {
                    warn!(collection = %wire.id, error = %e, "cannot resolve collection class");
                    cache.remove_collection(&wire.id);
                    return Ok(Collection::failed(
                        &wire.id,
                        CollectionClass::Email,
                        e.collection_status(),
                    ));
                }
            },
        };

        let sync_key = match &wire.sync_key {
            Some(raw) => match SyncKey::parse(raw) {
                Ok(key) => key,
                Err(e) => {
                    warn!(collection = %wire.id, error = %e, "unparsable sync key");
                    return Ok(Collection::failed(&wire.id, class, SyncStatus::KeyMismatch));
                }
            },
            None => match cached.sync_key.clone() {
                Some(key) => key,
                None if !wire.commands.is_empty() => {
                    warn!(collection = %wire.id, "no sync key for collection with commands");
                    SyncKey::Initial
                }
                None if ctx.version.features().hierarchy_required => {
                    return Err(Rejection::new(SyncStatus::FolderSyncRequired));
                }
                None => {
                    return Ok(Collection::failed(&wire.id, class, SyncStatus::KeyMismatch));
                }
            },
        };

        if let Some(supported) = &wire.supported {
            if sync_key.is_initial() {
                cache.supported.insert(class, supported.clone());
            }
        }

        let mut collection = Collection::new(&wire.id, class, sync_key);
        collection.window_size = clamp_window_size(
            wire.window_size.or(cached.window_size),
            config.default_window_size,
        );
        collection.options = cached.options.clone();
        if let Some(options) = &wire.options {
            collection.options.merge_from(options);
            if cached.sync_key.is_some()
                && cached.options.filter_type() != collection.options.filter_type()
            {
                debug!(collection = %wire.id, "filter type changed");
                collection.force_refresh = true;
            }
        }
        collection.deletes_as_moves = wire
            .deletes_as_moves
            .or(cached.deletes_as_moves)
            .unwrap_or(true);
        collection.conversation_mode = wire
            .conversation_mode
            .or(cached.conversation_mode)
            .unwrap_or(false);
        collection.get_changes = wire.get_changes.unwrap_or(true);
        collection.supported = supported_for(cache, class);
        collection.commands = wire.commands.clone();
        collection.ping_change = cached.ping_change;
        collection.remember(cache);
        Ok(collection)
    }

    /// Collections in request order.
    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// Mutable collections in request order.
    pub fn collections_mut(&mut self) -> &mut [Collection] {
        &mut self.collections
    }

    /// Finds a collection.
    pub fn get(&self, id: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.id == id)
    }

    /// Global window of the response.
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Returns true if the request was rebuilt from the cache.
    pub fn is_replayed(&self) -> bool {
        self.replayed
    }

    /// How long the request may wait for changes, if it asked to.
    pub fn long_poll(&self, config: &EngineConfig) -> Option<Duration> {
        match (self.heartbeat_interval, self.wait) {
            (Some(seconds), _) => Some(Duration::from_secs(u64::from(seconds))),
            (None, Some(minutes)) => Some(Duration::from_secs(u64::from(minutes) * 60)),
            (None, None) if self.replayed => Some(config.heartbeat_default),
            (None, None) => None,
        }
    }
}
