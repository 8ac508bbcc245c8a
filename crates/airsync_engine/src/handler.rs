//! Sync command orchestration.

use crate::backend::SyncBackend;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::export::{Exporter, WindowBudget};
use crate::heartbeat::{HeartbeatController, HeartbeatState, Watched};
use crate::import::import_collection;
use crate::registry::CollectionRegistry;
use airsync_codec::EventReader;
use airsync_protocol::{ProtocolResult, SyncRequest, SyncResponse, SyncStatus};
use airsync_state::{StateError, StateStore, SyncCache};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Handles Sync requests against one state store and backend.
///
/// The handler is shared by all requests; each call to [`SyncHandler::handle`]
/// runs on its own task.
pub struct SyncHandler<S, B> {
    config: EngineConfig,
    store: Arc<S>,
    backend: Arc<B>,
}

impl<S: StateStore, B: SyncBackend> SyncHandler<S, B> {
    /// Creates a handler.
    pub fn new(config: EngineConfig, store: Arc<S>, backend: Arc<B>) -> Self {
        Self {
            config,
            store,
            backend,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the state store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Decodes a request from `reader` and handles it.
    ///
    /// Every outcome except cancellation is a response the device can
    /// parse.
    pub async fn handle(
        &self,
        ctx: &RequestContext,
        reader: &mut EventReader,
    ) -> EngineResult<SyncResponse> {
        let request = SyncRequest::decode(reader, ctx.version);
        self.respond(ctx, request).await
    }

    /// Handles an already decoded request; `None` is the empty request.
    pub async fn handle_request(
        &self,
        ctx: &RequestContext,
        request: Option<SyncRequest>,
    ) -> EngineResult<SyncResponse> {
        self.respond(ctx, Ok(request)).await
    }

    async fn respond(
        &self,
        ctx: &RequestContext,
        request: ProtocolResult<Option<SyncRequest>>,
    ) -> EngineResult<SyncResponse> {
        match self.run(ctx, request).await {
            Ok(response) => Ok(response),
            Err(EngineError::Cancelled) => {
                info!(device = %ctx.device_id, "sync request cancelled");
                Err(EngineError::Cancelled)
            }
            Err(e) => {
                let status = e.status();
                error!(device = %ctx.device_id, error = %e, %status, "sync request failed");
                Ok(SyncResponse::error(status))
            }
        }
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        request: ProtocolResult<Option<SyncRequest>>,
    ) -> EngineResult<SyncResponse> {
        let device = ctx.device_id.as_str();
        let features = ctx.version.features();
        let mut cache = self.store.load_cache(device)?;
        if features.hierarchy_required && !cache.has_hierarchy() {
            info!(device, "sync before folder sync");
            return Ok(SyncResponse::error(SyncStatus::FolderSyncRequired));
        }

        let request = request?;
        let registry = match &request {
            Some(request) => CollectionRegistry::from_request(
                ctx,
                &self.config,
                self.backend.as_ref(),
                &mut cache,
                request,
            ),
            None => CollectionRegistry::from_cache(ctx, &self.config, &cache),
        };
        let mut registry = match registry {
            Ok(registry) => registry,
            Err(rejection) => {
                debug!(device, status = %rejection.status, "request rejected");
                return Ok(rejection.into_response());
            }
        };
        if request.is_some() {
            self.store.save_cache(device, &mut cache)?;
        }
        let generation = cache.generation;

        self.load_states(ctx, &mut registry)?;
        for collection in registry.collections_mut() {
            import_collection(ctx, self.backend.as_ref(), collection)?;
        }
        ctx.check_cancelled()?;

        if let Some(ceiling) = self.long_poll_ceiling(ctx, &registry, &cache) {
            let watched: Vec<Watched> = registry
                .collections()
                .iter()
                .filter(|c| c.get_changes)
                .map(|c| Watched {
                    id: c.id.clone(),
                    sync_key: c.sync_key.clone(),
                    filter: c.options.filter_type(),
                })
                .collect();
            let mut controller = HeartbeatController::new(
                ctx,
                self.store.as_ref(),
                self.backend.as_ref(),
                self.config.poll_interval,
            );
            match controller.wait(&watched, ceiling, generation).await {
                HeartbeatState::Changed(ids) => {
                    for collection in registry.collections_mut() {
                        if ids.contains(&collection.id) {
                            collection.ping_change = true;
                            cache.set_ping_change(&collection.id);
                        }
                    }
                }
                HeartbeatState::TimedOut => {
                    self.finish(ctx, &mut cache, generation);
                    return Ok(SyncResponse::empty());
                }
                HeartbeatState::Stale => {
                    info!(device, "device cache taken over by another request");
                    return Ok(SyncResponse::error(SyncStatus::KeyMismatch));
                }
                HeartbeatState::Cancelled => return Err(EngineError::Cancelled),
                HeartbeatState::Failed(status) => return Ok(SyncResponse::error(status)),
                HeartbeatState::Idle | HeartbeatState::Waiting => {}
            }
        }
        ctx.check_cancelled()?;

        let exporter = Exporter::new(ctx, &self.config, self.store.as_ref(), self.backend.as_ref());
        let mut budget = WindowBudget::new(registry.window_size());
        let mut collections = Vec::with_capacity(registry.collections().len());
        for collection in registry.collections_mut() {
            collections.push(exporter.export(&mut cache, collection, &mut budget)?);
        }
        self.finish(ctx, &mut cache, generation);

        debug!(
            device,
            collections = collections.len(),
            sent = budget.used(),
            "sync complete"
        );
        Ok(SyncResponse::success(collections))
    }

    fn load_states(
        &self,
        ctx: &RequestContext,
        registry: &mut CollectionRegistry,
    ) -> EngineResult<()> {
        let device = ctx.device_id.as_str();
        for collection in registry.collections_mut() {
            if !collection.is_ok() {
                continue;
            }
            match self
                .store
                .load_state(device, &collection.id, &collection.sync_key)
            {
                Ok(state) => collection.state = state,
                Err(StateError::Stale { .. }) => {
                    warn!(device, collection = %collection.id, key = %collection.sync_key, "superseded sync key, resetting state");
                    self.store
                        .remove_state(device, &collection.id, &collection.sync_key)?;
                    collection.fail(SyncStatus::KeyMismatch);
                }
                Err(StateError::Gone { .. }) => {
                    info!(device, collection = %collection.id, key = %collection.sync_key, "unknown sync key");
                    collection.fail(SyncStatus::KeyMismatch);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn long_poll_ceiling(
        &self,
        ctx: &RequestContext,
        registry: &CollectionRegistry,
        cache: &SyncCache,
    ) -> Option<Duration> {
        if !ctx.version.features().looping_sync {
            return None;
        }
        let ceiling = registry.long_poll(&self.config)?;
        let quiet = registry.collections().iter().all(|c| {
            c.is_ok()
                && !c.sync_key.is_initial()
                && !c.imported_changes
                && !c.has_replies()
                && !c.state.has_pending()
                && !c.ping_change
                && !cache.has_ping_change(&c.id)
        });
        quiet.then_some(ceiling)
    }

    fn finish(&self, ctx: &RequestContext, cache: &mut SyncCache, generation: u64) {
        let device = ctx.device_id.as_str();
        if ctx.version.features().looping_sync {
            match self.store.cache_generation(device) {
                Ok(current) if current != generation => {
                    info!(device, "device cache changed concurrently, not saving");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(device, error = %e, "cannot check cache generation");
                    return;
                }
            }
            cache.mark_sync_end();
        }
        if let Err(e) = self.store.save_cache(device, cache) {
            warn!(device, error = %e, "cannot save sync cache");
        }
    }
}
