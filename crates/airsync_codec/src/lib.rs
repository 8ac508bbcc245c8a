//! # AirSync Codec
//!
//! Tag/content event streams for the AirSync protocol.
//!
//! The binary token encoding is handled elsewhere; this crate provides
//! the abstract stream the sync engine works against:
//! - [`Tag`] identifiers grouped by codepage, with constants in [`tags`]
//! - [`Event`] values (start, end, content)
//! - [`EventReader`] for peek/consume style decoding
//! - [`EventWriter`] for building responses
//!
//! ## Usage
//!
//! ```
//! use airsync_codec::{tags::airsync, EventReader, EventWriter};
//!
//! let mut writer = EventWriter::new();
//! writer.start(airsync::SYNC);
//! writer.leaf(airsync::STATUS, "1");
//! writer.end().unwrap();
//!
//! let mut reader = EventReader::new(writer.finish().unwrap());
//! reader.expect_start(airsync::SYNC).unwrap();
//! assert_eq!(reader.read_leaf(airsync::STATUS).unwrap().as_deref(), Some("1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod error;
mod event;
mod reader;
mod tag;
mod writer;

pub use error::{CodecError, CodecResult};
pub use event::Event;
pub use reader::EventReader;
pub use tag::{pages, tags, Tag};
pub use writer::EventWriter;
