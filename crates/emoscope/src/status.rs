//! The single status slot shown to the user.

use crate::error::ErrorKind;
use emoscope_core::Expression;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoadingModels,
    RequestingCamera,
    CameraActive,
    Scanning,
    FaceDetected(Expression),
    Error(ErrorKind),
}

/// Display tone; the only severity the slot carries besides the error tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Normal,
    Detected,
    Error,
}

impl Tone {
    pub fn color(self) -> &'static str {
        match self {
            Tone::Normal => "white",
            Tone::Detected => "#00ff00",
            Tone::Error => "red",
        }
    }

    pub fn ansi(self) -> &'static str {
        match self {
            Tone::Normal => "\x1b[37m",
            Tone::Detected => "\x1b[32m",
            Tone::Error => "\x1b[31m",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub phase: Phase,
    pub text: String,
}

impl Status {
    pub fn loading_models() -> Self {
        Self::new(Phase::LoadingModels, "Loading models...")
    }

    pub fn requesting_camera() -> Self {
        Self::new(Phase::RequestingCamera, "Accessing camera...")
    }

    pub fn camera_active() -> Self {
        Self::new(Phase::CameraActive, "Camera active. Starting AI...")
    }

    pub fn scanning() -> Self {
        Self::new(Phase::Scanning, "Scanning for faces...")
    }

    pub fn face_detected(expression: Expression) -> Self {
        Self::new(
            Phase::FaceDetected(expression),
            format!("Face Detected: {}", expression.as_upper()),
        )
    }

    pub fn error(kind: ErrorKind, message: impl std::fmt::Display) -> Self {
        let prefix = match kind {
            ErrorKind::ModelLoad => "Model Error",
            ErrorKind::CameraAccess => "Camera Denied",
            ErrorKind::Detection => "Detection error",
            ErrorKind::Uncaught => "Error",
        };
        Self::new(Phase::Error(kind), format!("{prefix}: {message}"))
    }

    fn new(phase: Phase, text: impl Into<String>) -> Self {
        Self {
            phase,
            text: text.into(),
        }
    }

    pub fn tone(&self) -> Tone {
        match self.phase {
            Phase::FaceDetected(_) => Tone::Detected,
            Phase::Error(_) => Tone::Error,
            _ => Tone::Normal,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.phase {
            Phase::Error(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Anything the session can report its phase to.
pub trait StatusReporter {
    fn report(&self, status: Status);
}

/// Overwrite-only status slot backed by a `watch` channel.
#[derive(Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<Status>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Status::loading_models());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Status {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    /// Route panics into the slot, tagged as uncaught, then run the previous hook.
    pub fn install_panic_hook(&self) {
        let board = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            board.report(Status::error(ErrorKind::Uncaught, info));
            previous(info);
        }));
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter for StatusBoard {
    fn report(&self, status: Status) {
        let unchanged = *self.tx.borrow() == status;
        if !unchanged {
            match status.tone() {
                Tone::Error => tracing::error!(kind = ?status.error_kind(), "{}", status.text),
                tone => tracing::info!(phase = ?status.phase, color = tone.color(), "{}", status.text),
            }
        }
        self.tx.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_texts_and_tones() {
        let s = Status::face_detected(Expression::Happy);
        assert_eq!(s.text, "Face Detected: HAPPY");
        assert_eq!(s.tone(), Tone::Detected);
        assert_eq!(s.tone().color(), "#00ff00");

        let s = Status::error(ErrorKind::CameraAccess, "permission denied");
        assert_eq!(s.text, "Camera Denied: permission denied");
        assert_eq!(s.tone(), Tone::Error);
        assert_eq!(s.error_kind(), Some(ErrorKind::CameraAccess));

        assert_eq!(Status::scanning().tone(), Tone::Normal);
        assert_eq!(Status::scanning().error_kind(), None);
    }

    #[test]
    fn test_board_keeps_only_latest() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        board.report(Status::requesting_camera());
        board.report(Status::scanning());
        assert_eq!(board.current(), Status::scanning());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Status::scanning());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let board = StatusBoard::new();
        let other = board.clone();
        other.report(Status::error(ErrorKind::Uncaught, "boom"));
        assert_eq!(board.current().error_kind(), Some(ErrorKind::Uncaught));
    }

    #[test]
    fn test_panic_hook_reports_uncaught() {
        let board = StatusBoard::new();
        board.install_panic_hook();
        let result: std::thread::Result<()> = std::panic::catch_unwind(|| panic!("boom"));
        // Back to the default hook so other tests are unaffected.
        let _ = std::panic::take_hook();

        assert!(result.is_err());
        let status = board.current();
        assert_eq!(status.error_kind(), Some(ErrorKind::Uncaught));
        assert!(status.text.starts_with("Error: "), "{}", status.text);
        assert!(status.text.contains("boom"));
    }
}
