//! # AirSync Engine
//!
//! Server side state machine of the AirSync Sync command.
//!
//! This crate provides:
//! - [`SyncHandler`] orchestrating one request end to end
//! - [`CollectionRegistry`] merging requested collections with the device cache
//! - The import pipeline applying client operations
//! - The export pipeline paging server changes under a [`WindowBudget`]
//! - [`HeartbeatController`] for long-poll waits
//! - The [`SyncBackend`] trait with an in-memory [`MemoryBackend`]
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use airsync_engine::{EngineConfig, MemoryBackend, RequestContext, SyncHandler};
//! use airsync_protocol::{CollectionClass, CollectionRequest, ProtocolVersion, SyncRequest};
//! use airsync_state::{MemoryStateStore, StateStore};
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! runtime.block_on(async {
//!     let backend = Arc::new(MemoryBackend::new());
//!     backend.add_folder("inbox", CollectionClass::Email);
//!     let store = Arc::new(MemoryStateStore::new());
//!     store.set_hierarchy("dev1", "1").unwrap();
//!
//!     let handler = SyncHandler::new(EngineConfig::default(), store, backend);
//!     let ctx = RequestContext::new("dev1", ProtocolVersion::V14_1);
//!     let request = SyncRequest::new().with_collection(CollectionRequest::new("inbox", "0"));
//!     let response = handler.handle_request(&ctx, Some(request)).await.unwrap();
//!     assert!(response.status.is_success());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod backend;
mod config;
mod context;
mod error;
mod export;
mod handler;
mod heartbeat;
mod import;
mod memory;
mod registry;

pub use backend::{
    BackendError, BackendResult, ItemStamp, ModifyOptions, ModifyOutcome, RemoveOutcome,
    SyncBackend,
};
pub use config::EngineConfig;
pub use context::{CancelHandle, Cancellation, RequestContext};
pub use error::{EngineError, EngineResult};
pub use export::{Exporter, WindowBudget};
pub use handler::SyncHandler;
pub use heartbeat::{HeartbeatController, HeartbeatState, Watched};
pub use import::import_collection;
pub use memory::MemoryBackend;
pub use registry::{clamp_window_size, Collection, CollectionRegistry, Rejection};
