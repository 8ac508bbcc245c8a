//! Per-collection change tracking state.

use airsync_protocol::{Change, ChangeKind, FilterType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot stored under a sync key.
///
/// Holds what the next exchange needs to compute its diff: the backend
/// stamp the device is current to, changes already computed but not yet
/// sent, the items the device holds, and the stamps of items the device
/// itself wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    /// Backend stamp the device is current to.
    pub baseline: u64,
    /// Changes computed after `baseline` that still have to be sent.
    pub pending: Vec<Change>,
    /// Items on the device, with the stamp of the version it holds.
    #[serde(default)]
    pub held: BTreeMap<String, u64>,
    /// Stamps of items written by the device, not to be echoed back.
    pub mirrored: BTreeMap<String, u64>,
    /// Filter the pending changes were computed with.
    pub filter_type: FilterType,
}

impl CollectionState {
    /// Remembers an item the device wrote.
    pub fn mirror(&mut self, server_id: impl Into<String>, stamp: u64) {
        self.mirrored.insert(server_id.into(), stamp);
    }

    /// Returns true if `change` was produced by the device's own import.
    pub fn is_echo(&self, change: &Change) -> bool {
        self.mirrored
            .get(&change.server_id)
            .is_some_and(|stamp| *stamp >= change.stamp)
    }

    /// Drops mirror entries the baseline has moved past.
    pub fn prune_mirrored(&mut self) {
        let baseline = self.baseline;
        self.mirrored.retain(|_, stamp| *stamp > baseline);
    }

    /// Returns true if changes are queued from an earlier page.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Queues changes that did not fit in a page.
    pub fn queue(&mut self, changes: Vec<Change>) {
        self.pending = changes;
    }

    /// Records that the device holds `server_id` as of `stamp`.
    pub fn hold(&mut self, server_id: impl Into<String>, stamp: u64) {
        self.held.insert(server_id.into(), stamp);
    }

    /// Records that the device no longer holds `server_id`.
    pub fn release(&mut self, server_id: &str) {
        self.held.remove(server_id);
    }

    /// Updates the held items with a change sent to the device.
    pub fn track(&mut self, change: &Change) {
        match change.kind {
            ChangeKind::Add | ChangeKind::Change | ChangeKind::Flags => {
                self.hold(change.server_id.clone(), change.stamp)
            }
            ChangeKind::Delete | ChangeKind::SoftDelete => self.release(&change.server_id),
        }
    }
}
