//! Per-request context and cancellation.

use crate::error::{EngineError, EngineResult};
use airsync_protocol::ProtocolVersion;
use tokio::sync::watch;

/// Cancels the request it was created for.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Signals cancellation.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving side of a cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Option<watch::Receiver<bool>>);

impl Cancellation {
    /// Creates a linked handle and signal.
    pub fn channel() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(tx), Self(Some(rx)))
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self(None)
    }

    /// Returns true once cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Completes when cancellation is signalled.
    ///
    /// Never completes if the handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.0 else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Identity of the device and session issuing a request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Device id.
    pub device_id: String,
    /// Negotiated protocol version.
    pub version: ProtocolVersion,
    /// Cancellation signal of the request.
    pub cancellation: Cancellation,
}

impl RequestContext {
    /// Creates a context that is never cancelled.
    pub fn new(device_id: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            device_id: device_id.into(),
            version,
            cancellation: Cancellation::never(),
        }
    }

    /// Attaches a cancellation signal.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Returns an error if the request was cancelled.
    pub fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancellation.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn never_is_not_cancelled() {
        let ctx = RequestContext::new("dev", ProtocolVersion::V14_1);
        assert!(ctx.check_cancelled().is_ok());
    }

    #[test]
    fn handle_cancels() {
        let (handle, cancellation) = Cancellation::channel();
        let ctx = RequestContext::new("dev", ProtocolVersion::V14_1).with_cancellation(cancellation);
        handle.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(EngineError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_future_completes() {
        let (handle, cancellation) = Cancellation::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            handle.cancel();
        });
        cancellation.cancelled().await;
        assert!(cancellation.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_fires() {
        let (handle, cancellation) = Cancellation::channel();
        drop(handle);
        let result =
            tokio::time::timeout(Duration::from_secs(60), cancellation.cancelled()).await;
        assert!(result.is_err());
    }
}
