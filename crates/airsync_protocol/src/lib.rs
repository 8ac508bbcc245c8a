//! # AirSync Protocol
//!
//! Types of the AirSync Sync command.
//!
//! This crate provides:
//! - [`SyncStatus`] codes
//! - [`SyncKey`] version tokens
//! - [`ProtocolVersion`] and its [`VersionFeatures`] table
//! - Collection classes and sticky [`CollectionOptions`]
//! - Item payloads ([`ApplicationData`]) and server [`ChangeSet`]s
//! - [`SyncRequest`] decoding and [`SyncResponse`] encoding over event streams
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod change;
mod error;
mod options;
mod request;
mod response;
mod status;
mod sync_key;
mod version;

pub use change::{ApplicationData, Change, ChangeKind, ChangeSet, Property, PropertyValue};
pub use error::{ProtocolError, ProtocolResult};
pub use options::{
    BodyPreference, CollectionClass, CollectionOptions, ConflictPolicy, FilterType,
    SupportedFields,
};
pub use request::{CollectionRequest, Command, SyncRequest};
pub use response::{AddReply, CollectionResponse, FetchReply, Replies, SyncResponse};
pub use status::SyncStatus;
pub use sync_key::SyncKey;
pub use version::{ProtocolVersion, VersionFeatures};

/// Largest window a device may request, per collection and per response.
pub const MAX_WINDOW_SIZE: u32 = 512;

/// Longest heartbeat interval, in seconds.
pub const MAX_HEARTBEAT: u32 = 3540;

/// Longest wait interval, in minutes.
pub const MAX_WAIT_MINUTES: u32 = MAX_HEARTBEAT / 60;
