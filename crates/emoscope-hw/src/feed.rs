//! Live video feed: the newest captured frame plus playback state.

use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Flags shared between the feed and its capture thread.
#[derive(Debug, Default)]
pub(crate) struct FeedState {
    pub(crate) stop: AtomicBool,
    pub(crate) paused: AtomicBool,
    pub(crate) ended: AtomicBool,
}

/// Receiving end of a capture stream.
///
/// Holds only the most recent frame; older frames are overwritten, never
/// queued. Dropping the feed asks the capture thread to stop.
pub struct VideoFeed {
    rx: watch::Receiver<Option<Arc<Frame>>>,
    state: Arc<FeedState>,
    device_path: String,
}

impl VideoFeed {
    pub(crate) fn new(
        rx: watch::Receiver<Option<Arc<Frame>>>,
        state: Arc<FeedState>,
        device_path: String,
    ) -> Self {
        Self { rx, state, device_path }
    }

    /// A feed driven by an arbitrary frame publisher instead of a camera.
    pub fn from_channel(rx: watch::Receiver<Option<Arc<Frame>>>, label: &str) -> Self {
        Self::new(rx, Arc::new(FeedState::default()), label.to_string())
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Dimensions of the newest frame, `(0, 0)` before the first one arrives.
    pub fn intrinsic_size(&self) -> (u32, u32) {
        self.rx.borrow().as_ref().map(|f| f.dims()).unwrap_or((0, 0))
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.rx.borrow().clone()
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    /// True once the publisher has gone away.
    pub fn is_ended(&self) -> bool {
        self.state.ended.load(Ordering::Acquire) || self.rx.has_changed().is_err()
    }

    /// Wait for a frame newer than the last one observed.
    ///
    /// Returns `false` when the stream has ended.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl Drop for VideoFeed {
    fn drop(&mut self) {
        self.state.stop.store(true, Ordering::Release);
    }
}
