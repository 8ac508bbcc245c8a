//! # AirSync State
//!
//! Sync key state and device sync cache persistence.
//!
//! This crate provides:
//! - [`StateStore`] - the persistence trait the sync engine depends on
//! - [`CollectionState`] - the snapshot stored under each sync key
//! - [`SyncCache`] - per-device sticky data and long-poll preferences
//! - [`MemoryStateStore`] - an in-memory implementation
//!
//! Database adapters implement [`StateStore`] outside this crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod cache;
mod error;
mod memory;
mod state;
mod store;

pub use cache::{now_millis, CachedCollection, SyncCache};
pub use error::{StateError, StateResult};
pub use memory::MemoryStateStore;
pub use state::CollectionState;
pub use store::StateStore;
