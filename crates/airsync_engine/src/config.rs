//! Configuration for the sync engine.

use airsync_protocol::MAX_WINDOW_SIZE;
use std::time::Duration;

/// Operator settings for Sync handling.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Long-poll duration when the device sent neither heartbeat nor wait.
    pub heartbeat_default: Duration,
    /// Delay between change checks during a long-poll.
    pub poll_interval: Duration,
    /// Upper bound for any single collection window.
    pub max_window_size: Option<u32>,
    /// Global window that replaces the one requested by devices.
    pub max_request_window_size: Option<u32>,
    /// Window used when neither the request nor the cache carries one.
    pub default_window_size: u32,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            heartbeat_default: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            max_window_size: None,
            max_request_window_size: None,
            default_window_size: MAX_WINDOW_SIZE,
        }
    }

    /// Sets the default long-poll duration.
    pub fn with_heartbeat_default(mut self, duration: Duration) -> Self {
        self.heartbeat_default = duration;
        self
    }

    /// Sets the delay between change checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Caps every collection window.
    pub fn with_max_window_size(mut self, size: u32) -> Self {
        self.max_window_size = Some(size);
        self
    }

    /// Overrides the global window requested by devices.
    pub fn with_max_request_window_size(mut self, size: u32) -> Self {
        self.max_request_window_size = Some(size);
        self
    }

    /// Sets the fallback window size.
    pub fn with_default_window_size(mut self, size: u32) -> Self {
        self.default_window_size = size;
        self
    }

    /// Applies the operator cap to a collection window.
    pub fn collection_window(&self, requested: u32) -> u32 {
        match self.max_window_size {
            Some(max) => requested.min(max.max(1)),
            None => requested,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
