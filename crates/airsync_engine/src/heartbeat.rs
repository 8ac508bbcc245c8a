//! Long-poll wait for server changes.

use crate::backend::{BackendError, SyncBackend};
use crate::context::RequestContext;
use airsync_protocol::{FilterType, SyncKey, SyncStatus};
use airsync_state::{StateError, StateStore};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Phase of a long-poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Not started.
    Idle,
    /// Waiting for changes.
    Waiting,
    /// Changes were found in these collections.
    Changed(Vec<String>),
    /// The interval elapsed without changes.
    TimedOut,
    /// Another request changed the device cache.
    Stale,
    /// The request was cancelled.
    Cancelled,
    /// Polling failed; the request ends with this status.
    Failed(SyncStatus),
}

impl HeartbeatState {
    /// Returns true while the wait is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Returns true if the request should go on to export.
    pub fn proceeds(&self) -> bool {
        matches!(self, Self::Idle | Self::Changed(_))
    }
}

/// A collection watched during a long-poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watched {
    /// Collection id.
    pub id: String,
    /// Key the device holds.
    pub sync_key: SyncKey,
    /// Filter changes are counted with.
    pub filter: FilterType,
}

/// Waits until a watched collection changes or the interval elapses.
pub struct HeartbeatController<'a, S, B> {
    ctx: &'a RequestContext,
    store: &'a S,
    backend: &'a B,
    poll_interval: Duration,
    state: HeartbeatState,
}

impl<'a, S: StateStore, B: SyncBackend> HeartbeatController<'a, S, B> {
    /// Creates an idle controller.
    pub fn new(
        ctx: &'a RequestContext,
        store: &'a S,
        backend: &'a B,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            store,
            backend,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            state: HeartbeatState::Idle,
        }
    }

    /// Current phase.
    pub fn state(&self) -> &HeartbeatState {
        &self.state
    }

    /// Polls the watched collections until something happens or `ceiling`
    /// elapses.
    ///
    /// The first check runs immediately. `generation` is the cache
    /// generation this request saved; any other value means a concurrent
    /// request took over the device.
    pub async fn wait(
        &mut self,
        watched: &[Watched],
        ceiling: Duration,
        generation: u64,
    ) -> HeartbeatState {
        self.transition(HeartbeatState::Waiting);
        let deadline = Instant::now() + ceiling;
        let outcome = loop {
            if self.ctx.cancellation.is_cancelled() {
                break HeartbeatState::Cancelled;
            }
            if let Some(outcome) = self.poll(watched, generation) {
                break outcome;
            }
            let now = Instant::now();
            if now >= deadline {
                break HeartbeatState::TimedOut;
            }
            let pause = self.poll_interval.min(deadline - now);
            let cancelled = tokio::select! {
                () = tokio::time::sleep(pause) => false,
                () = self.ctx.cancellation.cancelled() => true,
            };
            if cancelled {
                break HeartbeatState::Cancelled;
            }
        };
        self.transition(outcome.clone());
        outcome
    }

    fn poll(&self, watched: &[Watched], generation: u64) -> Option<HeartbeatState> {
        let device = self.ctx.device_id.as_str();
        match self.store.cache_generation(device) {
            Ok(current) if current != generation => return Some(HeartbeatState::Stale),
            Ok(_) => {}
            Err(e) => {
                warn!(device, error = %e, "cannot read cache generation");
                return Some(HeartbeatState::Failed(SyncStatus::ServerError));
            }
        }

        let mut changed = Vec::new();
        for collection in watched {
            let baseline = match self.store.load_state(device, &collection.id, &collection.sync_key)
            {
                Ok(state) => state.baseline,
                Err(e @ (StateError::Gone { .. } | StateError::Stale { .. })) => {
                    warn!(collection = %collection.id, error = %e, "state vanished during wait");
                    return Some(HeartbeatState::Failed(SyncStatus::RequestIncomplete));
                }
                Err(e) => {
                    warn!(collection = %collection.id, error = %e, "cannot load state during wait");
                    return Some(HeartbeatState::Failed(SyncStatus::ServerError));
                }
            };
            match self
                .backend
                .change_count(&collection.id, baseline, collection.filter)
            {
                Ok(0) => {}
                Ok(_) => changed.push(collection.id.clone()),
                Err(BackendError::FolderGone(_)) => {
                    return Some(HeartbeatState::Failed(SyncStatus::FolderSyncRequired))
                }
                Err(e) => {
                    warn!(collection = %collection.id, error = %e, "change count failed during wait");
                    return Some(HeartbeatState::Failed(SyncStatus::ServerError));
                }
            }
        }
        (!changed.is_empty()).then_some(HeartbeatState::Changed(changed))
    }

    fn transition(&mut self, next: HeartbeatState) {
        debug!(device = %self.ctx.device_id, from = ?self.state, to = ?next, "heartbeat");
        self.state = next;
    }
}
