//! Protocol versions and the behavior each one enables.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A protocol version negotiated by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// 2.5
    V2_5,
    /// 12.0
    V12_0,
    /// 12.1
    V12_1,
    /// 14.0
    V14_0,
    /// 14.1
    V14_1,
    /// 16.0
    V16_0,
    /// 16.1
    V16_1,
}

impl ProtocolVersion {
    /// All supported versions, oldest first.
    pub const ALL: [ProtocolVersion; 7] = [
        Self::V2_5,
        Self::V12_0,
        Self::V12_1,
        Self::V14_0,
        Self::V14_1,
        Self::V16_0,
        Self::V16_1,
    ];

    /// Returns the version string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V2_5 => "2.5",
            Self::V12_0 => "12.0",
            Self::V12_1 => "12.1",
            Self::V14_0 => "14.0",
            Self::V14_1 => "14.1",
            Self::V16_0 => "16.0",
            Self::V16_1 => "16.1",
        }
    }

    /// Returns the feature table for this version.
    pub fn features(self) -> VersionFeatures {
        VersionFeatures::for_version(self)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownVersion(s.to_string()))
    }
}

/// Version-conditional behavior of the Sync command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionFeatures {
    /// A request without a body replays the cached collection set.
    pub empty_request: bool,
    /// Heartbeat/wait long-poll and the empty response.
    pub looping_sync: bool,
    /// A hierarchy sync must precede any Sync.
    pub hierarchy_required: bool,
    /// Every collection response carries its class.
    pub class_in_response: bool,
    /// Add commands may carry their own class.
    pub class_in_add: bool,
    /// Collections may request conversation mode.
    pub conversation_mode: bool,
    /// Options may carry body part preferences.
    pub body_part_preference: bool,
    /// Options may carry rights management support.
    pub rights_management: bool,
    /// Removes may address a single instance of a recurring item.
    pub instance_removal: bool,
    /// Replies include Change responses for server-modified items.
    pub modified_replies: bool,
}

impl VersionFeatures {
    /// Builds the feature table for a version.
    pub const fn for_version(version: ProtocolVersion) -> Self {
        let v = version as u8;
        let v12_1 = ProtocolVersion::V12_1 as u8;
        let v14_0 = ProtocolVersion::V14_0 as u8;
        let v14_1 = ProtocolVersion::V14_1 as u8;
        let v16_0 = ProtocolVersion::V16_0 as u8;
        Self {
            empty_request: v >= v12_1,
            looping_sync: v >= v12_1,
            hierarchy_required: v >= v12_1,
            class_in_response: v < v12_1,
            class_in_add: v >= v14_0,
            conversation_mode: v >= v14_0,
            body_part_preference: v >= v14_1,
            rights_management: v >= v14_1,
            instance_removal: v >= v16_0,
            modified_replies: v >= v16_0,
        }
    }
}
