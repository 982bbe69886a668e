use crate::error::DetectionError;
use emoscope_core::{DetectionResult, DetectorOptions, FaceAnalyzer};
use emoscope_hw::Frame;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Pending reply to one detection request.
pub type DetectFuture = Pin<Box<dyn Future<Output = Result<Vec<DetectionResult>, DetectionError>> + Send>>;

/// Anything that can run face detection on a frame, asynchronously.
///
/// The returned future owns everything it needs, so the session can hold it
/// across loop iterations while it keeps handling triggers.
pub trait Detector {
    fn detect(&self, frame: Arc<Frame>, options: DetectorOptions) -> DetectFuture;
}

/// Messages sent from the session to the engine thread.
struct EngineRequest {
    frame: Arc<Frame>,
    options: DetectorOptions,
    reply: oneshot::Sender<Result<Vec<DetectionResult>, DetectionError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl Detector for EngineHandle {
    fn detect(&self, frame: Arc<Frame>, options: DetectorOptions) -> DetectFuture {
        let tx = self.tx.clone();
        Box::pin(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(EngineRequest {
                frame,
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DetectionError::EngineClosed)?;
            reply_rx.await.map_err(|_| DetectionError::EngineClosed)?
        })
    }
}

/// Spawn the analyzer on a dedicated OS thread.
///
/// The thread exits once every handle is dropped.
pub fn spawn_engine(mut analyzer: FaceAnalyzer) -> std::io::Result<EngineHandle> {
    spawn_worker(move |frame, options| {
        analyzer
            .analyze(&frame.data, frame.width, frame.height, options)
            .map_err(DetectionError::from)
    })
}

fn spawn_worker<F>(mut analyze: F) -> std::io::Result<EngineHandle>
where
    F: FnMut(&Frame, &DetectorOptions) -> Result<Vec<DetectionResult>, DetectionError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(1);

    std::thread::Builder::new()
        .name("emoscope-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let frame = &req.frame;
                if req.reply.is_closed() {
                    tracing::debug!(seq = frame.sequence, "request abandoned, skipping");
                    continue;
                }
                let started = std::time::Instant::now();
                let result = analyze(frame, &req.options);
                match &result {
                    Ok(faces) => tracing::debug!(
                        seq = frame.sequence,
                        faces = faces.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "frame analyzed"
                    ),
                    Err(e) => tracing::debug!(seq = frame.sequence, error = %e, "analysis failed"),
                }
                let _ = req.reply.send(result);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
