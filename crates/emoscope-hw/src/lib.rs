//! emoscope-hw: camera acquisition for the live overlay.
//!
//! Provides V4L2-based capture on a dedicated thread and a latest-frame
//! video feed that the detection loop polls.

pub mod camera;
pub mod feed;
pub mod frame;

pub use camera::{choose_device, Camera, CameraError, DeviceInfo, FacingMode, PixelFormat, StreamRequest};
pub use feed::VideoFeed;
pub use frame::Frame;
