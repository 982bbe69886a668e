//! V4L2 camera acquisition via the `v4l` crate.

use crate::feed::{FeedState, VideoFeed};
use crate::frame::{self, Frame};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const DEVICE_SCAN_LIMIT: usize = 16;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("no video capture devices available")]
    NoDevices,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Which way the preferred camera points. A hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
    Any,
}

/// What the caller wants from the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Explicit device path; overrides the facing hint.
    pub device: Option<String>,
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            device: None,
            facing: FacingMode::User,
            width: 640,
            height: 480,
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv,
    Grey,
    Y16,
}

const USER_FACING_HINTS: [&str; 5] = ["integrated", "front", "user", "facetime", "webcam"];
const ENVIRONMENT_HINTS: [&str; 4] = ["rear", "back", "environment", "world"];

/// Pick a device for the facing hint, by card name.
///
/// Falls back to the first device when nothing matches the hint.
pub fn choose_device(devices: &[DeviceInfo], facing: FacingMode) -> Option<&DeviceInfo> {
    let hints: &[&str] = match facing {
        FacingMode::User => &USER_FACING_HINTS,
        FacingMode::Environment => &ENVIRONMENT_HINTS,
        FacingMode::Any => &[],
    };
    devices
        .iter()
        .find(|d| {
            let name = d.name.to_ascii_lowercase();
            hints.iter().any(|h| name.contains(h))
        })
        .or_else(|| devices.first())
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a device and negotiate a grayscale-convertible format.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| classify_open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Resolve a [`StreamRequest`] to a device and open it.
    pub fn open_request(request: &StreamRequest) -> Result<Self, CameraError> {
        let path = match &request.device {
            Some(path) => path.clone(),
            None => {
                let devices = Self::list_devices();
                let chosen = choose_device(&devices, request.facing).ok_or(CameraError::NoDevices)?;
                tracing::info!(
                    device = %chosen.path,
                    name = %chosen.name,
                    facing = ?request.facing,
                    "selected camera"
                );
                chosen.path.clone()
            }
        };
        Self::open(&path, request.width, request.height)
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_grayscale(buf, self.width, self.height),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// Start streaming on a dedicated capture thread.
    ///
    /// The thread publishes every frame into the returned feed and exits when
    /// the feed is dropped or the device stops delivering buffers.
    pub fn start_stream(self) -> Result<VideoFeed, CameraError> {
        let (tx, rx) = watch::channel(None);
        let state = Arc::new(FeedState::default());
        let feed = VideoFeed::new(rx, state.clone(), self.device_path.clone());

        std::thread::Builder::new()
            .name("emoscope-capture".into())
            .spawn(move || {
                self.capture_loop(&tx, &state);
                state.ended.store(true, Ordering::Release);
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        Ok(feed)
    }

    fn capture_loop(&self, tx: &watch::Sender<Option<Arc<Frame>>>, state: &FeedState) {
        let mut stream = match MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(device = %self.device_path, error = %e, "failed to create mmap stream");
                return;
            }
        };
        tracing::info!(device = %self.device_path, fourcc = ?self.fourcc, "capture started");

        while !state.stop.load(Ordering::Acquire) {
            let (buf, meta) = match stream.next() {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(device = %self.device_path, error = %e, "failed to dequeue buffer");
                    break;
                }
            };
            match self.to_grayscale(buf) {
                Ok(gray) => {
                    let frame = Frame::new(gray, self.width, self.height, meta.sequence);
                    if tx.send(Some(Arc::new(frame))).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(seq = meta.sequence, error = %e, "dropping frame"),
            }
        }

        tracing::info!(device = %self.device_path, "capture stopped");
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..DEVICE_SCAN_LIMIT {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

fn classify_open_error(device_path: &str, e: std::io::Error) -> CameraError {
    let msg = format!("{device_path}: {e}");
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(msg)
    } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
        CameraError::DeviceBusy(msg)
    } else {
        CameraError::DeviceNotFound(msg)
    }
}
