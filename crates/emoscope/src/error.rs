use emoscope_core::{AnalyzeError, ModelLoadError};
use emoscope_hw::CameraError;
use std::time::Duration;
use thiserror::Error;

/// Which phase of the session an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ModelLoad,
    CameraAccess,
    Detection,
    Uncaught,
}

impl ErrorKind {
    /// Fatal kinds end the session before the loop starts.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::ModelLoad | ErrorKind::CameraAccess)
    }
}

#[derive(Error, Debug)]
pub enum CameraAccessError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no camera available: {0}")]
    NoDevice(String),
    #[error("camera busy: {0}")]
    Busy(String),
    #[error("camera failed: {0}")]
    Failed(String),
}

impl From<CameraError> for CameraAccessError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::PermissionDenied(msg) => CameraAccessError::PermissionDenied(msg),
            CameraError::DeviceBusy(msg) => CameraAccessError::Busy(msg),
            CameraError::DeviceNotFound(msg) => CameraAccessError::NoDevice(msg),
            CameraError::NoDevices => CameraAccessError::NoDevice("no capture devices".into()),
            other => CameraAccessError::Failed(other.to_string()),
        }
    }
}

/// Failure of a single detection cycle. Never stops the loop.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzeError),
    #[error("detection timed out after {0:?}")]
    TimedOut(Duration),
    #[error("inference engine stopped")]
    EngineClosed,
}

/// Why a session ended before its loop could run.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("model load failed: {0}")]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    CameraAccess(#[from] CameraAccessError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::ModelLoad(_) => ErrorKind::ModelLoad,
            SessionError::CameraAccess(_) => ErrorKind::CameraAccess,
        }
    }
}
