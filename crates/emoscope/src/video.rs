//! Video source seam between the session and the capture layer.

use crate::error::CameraAccessError;
use emoscope_core::DisplaySize;
use emoscope_hw::{Camera, Frame, StreamRequest, VideoFeed};
use std::future::Future;
use std::sync::Arc;

/// A live video the detection loop samples from.
pub trait VideoSource {
    /// Native frame size; zero until the stream has negotiated.
    fn intrinsic_size(&self) -> DisplaySize;
    fn is_paused(&self) -> bool;
    fn is_ended(&self) -> bool;
    fn current_frame(&self) -> Option<Arc<Frame>>;
    /// Resolve when a newer frame is published. Never resolves after the end
    /// of the stream.
    fn next_frame(&mut self) -> impl Future<Output = ()>;
}

impl VideoSource for VideoFeed {
    fn intrinsic_size(&self) -> DisplaySize {
        let (w, h) = VideoFeed::intrinsic_size(self);
        DisplaySize::new(w, h)
    }

    fn is_paused(&self) -> bool {
        VideoFeed::is_paused(self)
    }

    fn is_ended(&self) -> bool {
        VideoFeed::is_ended(self)
    }

    fn current_frame(&self) -> Option<Arc<Frame>> {
        self.latest()
    }

    async fn next_frame(&mut self) {
        if !self.changed().await {
            std::future::pending::<()>().await;
        }
    }
}

/// Grants access to a camera stream, or refuses it.
pub trait CameraProvider {
    type Video: VideoSource;

    fn open(&self, request: &StreamRequest) -> impl Future<Output = Result<Self::Video, CameraAccessError>>;
}

/// V4L2 cameras on this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4lCameras;

impl CameraProvider for V4lCameras {
    type Video = VideoFeed;

    async fn open(&self, request: &StreamRequest) -> Result<VideoFeed, CameraAccessError> {
        let request = request.clone();
        let feed = tokio::task::spawn_blocking(move || Camera::open_request(&request)?.start_stream())
            .await
            .map_err(|e| CameraAccessError::Failed(e.to_string()))??;
        tracing::info!(device = feed.device_path(), "camera stream open");
        Ok(feed)
    }
}
