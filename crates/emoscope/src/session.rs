//! The capture, detect and render loop.
//!
//! A [`Session`] loads the models, opens the camera and then runs detection
//! cycles until shutdown. At most one detection is in flight: a trigger that
//! arrives while a cycle is still running is dropped, never queued.

use crate::engine::{DetectFuture, Detector};
use crate::error::{DetectionError, ErrorKind, SessionError};
use crate::models::ModelProvider;
use crate::overlay::OverlaySurface;
use crate::status::{Status, StatusReporter};
use crate::video::{CameraProvider, VideoSource};
use emoscope_core::{resize_results, DetectionResult, DetectorOptions, DisplaySize, ModelLoadError};
use emoscope_hw::{Frame, StreamRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// What starts a detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Fixed cadence of `poll_interval`.
    #[default]
    Interval,
    /// Each newly published frame, once the previous cycle has finished.
    Frame,
}

/// Where per-cycle detection errors go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorDisplayMode {
    /// Status slot and log.
    #[default]
    Status,
    /// Log only.
    Log,
}

/// Model load attempts after the first one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub trigger: TriggerMode,
    pub poll_interval: Duration,
    pub detector: DetectorOptions,
    /// Mirror boxes horizontally, for user-facing cameras.
    pub mirror: bool,
    pub error_display: ErrorDisplayMode,
    /// Pause between camera start and the first cycle.
    pub start_delay: Duration,
    pub detect_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerMode::Interval,
            poll_interval: Duration::from_millis(500),
            detector: DetectorOptions::default(),
            mirror: true,
            error_display: ErrorDisplayMode::Status,
            start_delay: Duration::from_millis(1000),
            detect_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub triggers: u64,
    /// Triggers that found the video not ready.
    pub skipped_not_ready: u64,
    /// Triggers that arrived while a cycle was in flight.
    pub dropped_busy: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
}

struct InFlight {
    future: DetectFuture,
    display: DisplaySize,
    frame: Arc<Frame>,
}

enum CycleState {
    Idle,
    Detecting(InFlight),
}

enum Event {
    Shutdown,
    Completed(Result<Vec<DetectionResult>, DetectionError>),
    Trigger,
}

pub struct Session<M, C, S, R> {
    models: M,
    cameras: C,
    surface: S,
    reporter: R,
    request: StreamRequest,
    config: LoopConfig,
    stats: LoopStats,
}

impl<M, C, S, R> Session<M, C, S, R>
where
    M: ModelProvider,
    C: CameraProvider,
    S: OverlaySurface,
    R: StatusReporter,
{
    pub fn new(models: M, cameras: C, surface: S, reporter: R, request: StreamRequest, config: LoopConfig) -> Self {
        Self {
            models,
            cameras,
            surface,
            reporter,
            request,
            config,
            stats: LoopStats::default(),
        }
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    ///
    /// Returns early with an error when the models or the camera cannot be
    /// obtained; the camera is never requested without loaded models.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<LoopStats, SessionError> {
        self.reporter.report(Status::loading_models());
        let detector = match self.load_models().await {
            Ok(detector) => detector,
            Err(e) => {
                self.reporter.report(Status::error(ErrorKind::ModelLoad, &e));
                return Err(e.into());
            }
        };

        self.reporter.report(Status::requesting_camera());
        let mut video = match self.cameras.open(&self.request).await {
            Ok(video) => video,
            Err(e) => {
                self.reporter.report(Status::error(ErrorKind::CameraAccess, &e));
                return Err(e.into());
            }
        };
        self.reporter.report(Status::camera_active());

        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                tracing::info!("shutdown before first detection cycle");
                return Ok(self.stats);
            }
            _ = tokio::time::sleep(self.config.start_delay) => {}
        }

        self.detection_loop(&detector, &mut video, &mut shutdown).await;
        tracing::info!(stats = ?self.stats, "session finished");
        Ok(self.stats)
    }

    async fn load_models(&self) -> Result<M::Detector, ModelLoadError> {
        let policy = self.config.retry;
        let mut attempt = 0;
        loop {
            match self.models.load().await {
                Ok(detector) => return Ok(detector),
                Err(e) if attempt < policy.retries => {
                    attempt += 1;
                    tracing::warn!(attempt, retries = policy.retries, error = %e, "model load failed, retrying");
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn detection_loop(&mut self, detector: &M::Detector, video: &mut C::Video, shutdown: &mut watch::Receiver<bool>) {
        let trigger = self.config.trigger;
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut state = CycleState::Idle;

        tracing::info!(?trigger, interval_ms = self.config.poll_interval.as_millis() as u64, "detection loop started");

        loop {
            let idle = matches!(state, CycleState::Idle);
            let event = tokio::select! {
                _ = wait_for_shutdown(shutdown) => Event::Shutdown,
                result = completion(&mut state) => Event::Completed(result),
                _ = ticker.tick(), if trigger == TriggerMode::Interval => Event::Trigger,
                _ = video.next_frame(), if trigger == TriggerMode::Frame && idle => Event::Trigger,
            };

            match event {
                Event::Shutdown => break,
                Event::Completed(result) => {
                    if let CycleState::Detecting(flight) = std::mem::replace(&mut state, CycleState::Idle) {
                        self.finish_cycle(flight, result);
                    }
                }
                Event::Trigger => {
                    self.stats.triggers += 1;
                    if !idle {
                        self.stats.dropped_busy += 1;
                        tracing::trace!("detection still running, trigger dropped");
                        continue;
                    }
                    match self.begin_cycle(detector, video) {
                        Some(flight) => state = CycleState::Detecting(flight),
                        None => self.stats.skipped_not_ready += 1,
                    }
                }
            }
        }
    }

    fn begin_cycle(&mut self, detector: &M::Detector, video: &C::Video) -> Option<InFlight> {
        let size = video.intrinsic_size();
        if size.is_empty() || video.is_paused() || video.is_ended() {
            return None;
        }
        let frame = video.current_frame()?;

        if self.surface.size() != size {
            tracing::debug!(from = %self.surface.size(), to = %size, "resizing overlay");
            self.surface.set_size(size);
        }

        let future = detector.detect(frame.clone(), self.config.detector);
        let future: DetectFuture = match self.config.detect_timeout {
            Some(limit) => Box::pin(async move {
                tokio::time::timeout(limit, future)
                    .await
                    .map_err(|_| DetectionError::TimedOut(limit))?
            }),
            None => future,
        };
        self.stats.started += 1;
        Some(InFlight {
            future,
            display: size,
            frame,
        })
    }

    fn finish_cycle(&mut self, flight: InFlight, result: Result<Vec<DetectionResult>, DetectionError>) {
        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(seq = flight.frame.sequence, error = %e, "detection cycle failed");
                if self.config.error_display == ErrorDisplayMode::Status {
                    self.reporter.report(Status::error(ErrorKind::Detection, &e));
                }
                return;
            }
        };
        self.stats.completed += 1;

        let mut shown = resize_results(&detections, flight.display);
        if self.config.mirror {
            shown = shown.iter().map(DetectionResult::mirrored).collect();
        }

        self.surface.clear();
        for detection in &shown {
            self.surface.draw_detection(detection);
        }

        let status = match shown.first().and_then(DetectionResult::dominant_expression) {
            Some(expression) => Status::face_detected(expression),
            None => Status::scanning(),
        };
        self.reporter.report(status);

        if let Err(e) = self.surface.present(&flight.frame) {
            tracing::warn!(error = %e, "failed to present overlay");
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn completion(state: &mut CycleState) -> Result<Vec<DetectionResult>, DetectionError> {
    match state {
        CycleState::Detecting(flight) => flight.future.as_mut().await,
        CycleState::Idle => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CameraAccessError;
    use crate::overlay::OverlayError;
    use crate::status::{Phase, StatusBoard};
    use emoscope_core::{BoundingBox, Expression, ExpressionScores};
    use emoscope_hw::VideoFeed;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Script = Arc<dyn Fn(usize) -> Result<Vec<DetectionResult>, DetectionError> + Send + Sync>;

    #[derive(Clone)]
    struct FakeDetector {
        delay: Duration,
        script: Script,
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        options: Arc<Mutex<Vec<DetectorOptions>>>,
    }

    impl FakeDetector {
        fn new<F>(delay: Duration, script: F) -> Self
        where
            F: Fn(usize) -> Result<Vec<DetectionResult>, DetectionError> + Send + Sync + 'static,
        {
            Self {
                delay,
                script: Arc::new(script),
                calls: Arc::default(),
                in_flight: Arc::default(),
                max_in_flight: Arc::default(),
                options: Arc::default(),
            }
        }

        fn returning(results: Vec<DetectionResult>) -> Self {
            Self::new(Duration::ZERO, move |_| Ok(results.clone()))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Detector for FakeDetector {
        fn detect(&self, _frame: Arc<Frame>, options: DetectorOptions) -> DetectFuture {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.options.lock().unwrap().push(options);
            let result = (self.script)(call);
            let delay = self.delay;
            let in_flight = self.in_flight.clone();
            let max_in_flight = self.max_in_flight.clone();
            Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            })
        }
    }

    struct FakeModels {
        detector: FakeDetector,
        failures: Cell<u32>,
        loads: Rc<Cell<u32>>,
    }

    impl ModelProvider for FakeModels {
        type Detector = FakeDetector;

        async fn load(&self) -> Result<FakeDetector, ModelLoadError> {
            self.loads.set(self.loads.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(ModelLoadError::Worker("weights unavailable".into()));
            }
            Ok(self.detector.clone())
        }
    }

    struct FakeCameras {
        feed: RefCell<Option<VideoFeed>>,
        deny: bool,
        opens: Rc<Cell<u32>>,
    }

    impl CameraProvider for FakeCameras {
        type Video = VideoFeed;

        async fn open(&self, _request: &StreamRequest) -> Result<VideoFeed, CameraAccessError> {
            self.opens.set(self.opens.get() + 1);
            if self.deny {
                return Err(CameraAccessError::PermissionDenied("user refused".into()));
            }
            self.feed
                .borrow_mut()
                .take()
                .ok_or_else(|| CameraAccessError::Failed("already open".into()))
        }
    }

    #[derive(Default)]
    struct FakeSurface {
        size: DisplaySize,
        resizes: u32,
        clears: u32,
        presents: u32,
        drawn: Vec<DetectionResult>,
    }

    impl OverlaySurface for FakeSurface {
        fn size(&self) -> DisplaySize {
            self.size
        }

        fn set_size(&mut self, size: DisplaySize) {
            self.size = size;
            self.resizes += 1;
        }

        fn clear(&mut self) {
            self.clears += 1;
            self.drawn.clear();
        }

        fn draw_detection(&mut self, detection: &DetectionResult) {
            self.drawn.push(detection.clone());
        }

        fn present(&mut self, _frame: &Frame) -> Result<(), OverlayError> {
            self.presents += 1;
            Ok(())
        }
    }

    /// Reporter that keeps every status, not just the latest.
    #[derive(Clone, Default)]
    struct History(Rc<RefCell<Vec<Status>>>);

    impl History {
        fn phases(&self) -> Vec<Phase> {
            self.0.borrow().iter().map(|s| s.phase).collect()
        }
    }

    impl StatusReporter for History {
        fn report(&self, status: Status) {
            self.0.borrow_mut().push(status);
        }
    }

    impl StatusReporter for (History, StatusBoard) {
        fn report(&self, status: Status) {
            self.0.report(status.clone());
            self.1.report(status);
        }
    }

    type FrameTx = watch::Sender<Option<Arc<Frame>>>;
    type TestSession = Session<FakeModels, FakeCameras, FakeSurface, (History, StatusBoard)>;

    struct Harness {
        session: TestSession,
        history: History,
        board: StatusBoard,
        loads: Rc<Cell<u32>>,
        opens: Rc<Cell<u32>>,
        frames: FrameTx,
    }

    fn frame(width: u32, height: u32, seq: u32) -> Arc<Frame> {
        Arc::new(Frame::new(vec![0; (width * height) as usize], width, height, seq))
    }

    fn harness(detector: FakeDetector, config: LoopConfig) -> Harness {
        let (frames, rx) = watch::channel(None);
        let feed = VideoFeed::from_channel(rx, "fake");
        let loads = Rc::new(Cell::new(0));
        let opens = Rc::new(Cell::new(0));
        let history = History::default();
        let board = StatusBoard::new();
        let session = Session::new(
            FakeModels {
                detector,
                failures: Cell::new(0),
                loads: loads.clone(),
            },
            FakeCameras {
                feed: RefCell::new(Some(feed)),
                deny: false,
                opens: opens.clone(),
            },
            FakeSurface::default(),
            (history.clone(), board.clone()),
            StreamRequest::default(),
            config,
        );
        Harness {
            session,
            history,
            board,
            loads,
            opens,
            frames,
        }
    }

    async fn run_for(session: &mut TestSession, duration: Duration) -> Result<LoopStats, SessionError> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(true);
        });
        session.run(rx).await
    }

    fn happy_face() -> DetectionResult {
        DetectionResult {
            bbox: BoundingBox::new(10.0, 20.0, 50.0, 60.0),
            score: 0.95,
            expressions: ExpressionScores::from_pairs([
                (Expression::Happy, 0.7),
                (Expression::Neutral, 0.2),
                (Expression::Sad, 0.1),
            ]),
            image_dims: DisplaySize::new(320, 240),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_load_failure_never_requests_camera() {
        let mut h = harness(FakeDetector::returning(vec![]), LoopConfig::default());
        h.session.models.failures.set(1);

        let err = run_for(&mut h.session, Duration::from_secs(3)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelLoad);
        assert_eq!(h.loads.get(), 1);
        assert_eq!(h.opens.get(), 0);
        assert_eq!(h.board.current().error_kind(), Some(ErrorKind::ModelLoad));
        assert_eq!(h.history.phases().first(), Some(&Phase::LoadingModels));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_recovers() {
        let config = LoopConfig {
            retry: RetryPolicy {
                retries: 2,
                backoff: Duration::from_millis(100),
            },
            ..LoopConfig::default()
        };
        let mut h = harness(FakeDetector::returning(vec![]), config);
        h.session.models.failures.set(2);
        h.frames.send_replace(Some(frame(640, 480, 0)));

        let stats = run_for(&mut h.session, Duration::from_secs(2)).await.unwrap();
        assert_eq!(h.loads.get(), 3);
        assert_eq!(h.opens.get(), 1);
        assert!(stats.completed >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_is_fatal() {
        let config = LoopConfig {
            retry: RetryPolicy {
                retries: 1,
                backoff: Duration::from_millis(100),
            },
            ..LoopConfig::default()
        };
        let mut h = harness(FakeDetector::returning(vec![]), config);
        h.session.models.failures.set(2);

        let err = run_for(&mut h.session, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, SessionError::ModelLoad(_)));
        assert_eq!(h.loads.get(), 2);
        assert_eq!(h.opens.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_denied_runs_no_cycle() {
        let detector = FakeDetector::returning(vec![]);
        let mut h = harness(detector.clone(), LoopConfig::default());
        h.session.cameras.deny = true;

        let err = run_for(&mut h.session, Duration::from_secs(3)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CameraAccess);
        assert_eq!(detector.calls(), 0);
        let status = h.board.current();
        assert_eq!(status.error_kind(), Some(ErrorKind::CameraAccess));
        assert!(status.text.starts_with("Camera Denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_face_is_rescaled_and_mirrored() {
        let detector = FakeDetector::returning(vec![happy_face()]);
        let mut h = harness(detector.clone(), LoopConfig::default());
        h.frames.send_replace(Some(frame(640, 480, 1)));

        let stats = run_for(&mut h.session, Duration::from_millis(1200)).await.unwrap();
        assert!(stats.completed >= 1);
        assert_eq!(h.board.current().text, "Face Detected: HAPPY");

        let surface = &h.session.surface;
        assert_eq!(surface.size, DisplaySize::new(640, 480));
        assert_eq!(surface.resizes, 1);
        assert_eq!(surface.drawn.len(), 1);
        // 320x240 -> 640x480 doubles the box, then x' = 640 - 20 - 100.
        assert_eq!(surface.drawn[0].bbox, BoundingBox::new(520.0, 40.0, 100.0, 120.0));
        assert_eq!(surface.drawn[0].dominant_expression(), Some(Expression::Happy));
        assert!(surface.presents >= 1);

        let options = detector.options.lock().unwrap();
        assert_eq!(options[0], DetectorOptions::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_follows_mid_session_resize() {
        let detector = FakeDetector::returning(vec![happy_face()]);
        let Harness { mut session, frames, .. } = harness(detector.clone(), LoopConfig::default());
        frames.send_replace(Some(frame(320, 240, 1)));

        // First cycle at 1000ms sees 320x240, the next at 1500ms sees 640x480.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            frames.send_replace(Some(frame(640, 480, 2)));
            std::future::pending::<()>().await;
        });

        let stats = run_for(&mut session, Duration::from_millis(1700)).await.unwrap();
        assert!(stats.completed >= 2);
        let surface = &session.surface;
        assert_eq!(surface.resizes, 2);
        assert_eq!(surface.size, DisplaySize::new(640, 480));
        assert_eq!(surface.drawn.last().map(|d| d.bbox), Some(BoundingBox::new(520.0, 40.0, 100.0, 120.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_mirror_keeps_x() {
        let config = LoopConfig {
            mirror: false,
            ..LoopConfig::default()
        };
        let mut h = harness(FakeDetector::returning(vec![happy_face()]), config);
        h.frames.send_replace(Some(frame(640, 480, 1)));

        run_for(&mut h.session, Duration::from_millis(1200)).await.unwrap();
        assert_eq!(h.session.surface.drawn[0].bbox, BoundingBox::new(20.0, 40.0, 100.0, 120.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_faces_clears_and_scans() {
        let mut h = harness(FakeDetector::returning(vec![]), LoopConfig::default());
        h.frames.send_replace(Some(frame(640, 480, 1)));
        h.session.surface.drawn.push(happy_face());

        run_for(&mut h.session, Duration::from_millis(1700)).await.unwrap();
        let surface = &h.session.surface;
        assert!(surface.clears >= 1);
        assert!(surface.drawn.is_empty());
        assert_eq!(h.board.current(), Status::scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_size_video_is_not_ready() {
        let detector = FakeDetector::returning(vec![happy_face()]);
        let mut h = harness(detector.clone(), LoopConfig::default());

        let stats = run_for(&mut h.session, Duration::from_millis(2700)).await.unwrap();
        assert_eq!(detector.calls(), 0);
        assert_eq!(stats.started, 0);
        assert!(stats.skipped_not_ready >= 3);
        let surface = &h.session.surface;
        assert_eq!(surface.resizes, 0);
        assert_eq!(surface.clears, 0);
        assert_eq!(h.board.current(), Status::camera_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_video_is_not_ready() {
        let detector = FakeDetector::returning(vec![happy_face()]);
        let mut h = harness(detector.clone(), LoopConfig::default());
        h.frames.send_replace(Some(frame(640, 480, 1)));
        if let Some(feed) = h.session.cameras.feed.borrow().as_ref() {
            feed.pause();
        }

        let stats = run_for(&mut h.session, Duration::from_millis(2200)).await.unwrap();
        assert_eq!(detector.calls(), 0);
        assert!(stats.skipped_not_ready >= 2);
        assert_eq!(h.session.surface.clears, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_detector_never_overlaps() {
        // Each call takes longer than two poll intervals.
        let detector = FakeDetector::new(Duration::from_millis(1200), |_| Ok(vec![]));
        let mut h = harness(detector.clone(), LoopConfig::default());
        h.frames.send_replace(Some(frame(320, 240, 1)));

        let stats = run_for(&mut h.session, Duration::from_millis(5200)).await.unwrap();
        assert_eq!(detector.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(stats.dropped_busy >= 4);
        assert!(stats.completed >= 2);
        assert_eq!(stats.started as usize, detector.calls());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_failure_does_not_stop_loop() {
        let detector = FakeDetector::new(
            Duration::ZERO,
            |call| if call == 0 { Err(DetectionError::EngineClosed) } else { Ok(vec![]) },
        );
        let mut h = harness(detector, LoopConfig::default());
        h.frames.send_replace(Some(frame(320, 240, 1)));

        let stats = run_for(&mut h.session, Duration::from_millis(2200)).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert!(stats.completed >= 2);
        assert!(h.history.phases().contains(&Phase::Error(ErrorKind::Detection)));
        assert_eq!(h.board.current(), Status::scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_mode_keeps_status_slot_clean() {
        let config = LoopConfig {
            error_display: ErrorDisplayMode::Log,
            ..LoopConfig::default()
        };
        let detector = FakeDetector::new(Duration::ZERO, |_| Err(DetectionError::EngineClosed));
        let mut h = harness(detector, config);
        h.frames.send_replace(Some(frame(320, 240, 1)));

        let stats = run_for(&mut h.session, Duration::from_millis(2200)).await.unwrap();
        assert!(stats.failed >= 2);
        assert!(h.history.phases().iter().all(|p| !matches!(p, Phase::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_detection_times_out() {
        let config = LoopConfig {
            detect_timeout: Some(Duration::from_millis(300)),
            ..LoopConfig::default()
        };
        let detector = FakeDetector::new(Duration::from_secs(10), |_| Ok(vec![]));
        let mut h = harness(detector, config);
        h.frames.send_replace(Some(frame(320, 240, 1)));

        let stats = run_for(&mut h.session, Duration::from_millis(2200)).await.unwrap();
        assert!(stats.failed >= 2);
        assert_eq!(stats.completed, 0);
        assert!(h.board.current().text.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_trigger_follows_new_frames() {
        let config = LoopConfig {
            trigger: TriggerMode::Frame,
            ..LoopConfig::default()
        };
        let detector = FakeDetector::new(Duration::from_millis(250), |_| Ok(vec![]));
        let Harness { mut session, frames, .. } = harness(detector.clone(), config);

        tokio::spawn(async move {
            for seq in 0..40 {
                frames.send_replace(Some(frame(320, 240, seq)));
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let stats = run_for(&mut session, Duration::from_millis(3000)).await.unwrap();
        assert!(stats.completed >= 3);
        assert_eq!(stats.dropped_busy, 0);
        assert_eq!(detector.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_start_delay() {
        let detector = FakeDetector::returning(vec![]);
        let mut h = harness(detector.clone(), LoopConfig::default());
        h.frames.send_replace(Some(frame(320, 240, 1)));

        let stats = run_for(&mut h.session, Duration::from_millis(500)).await.unwrap();
        assert_eq!(stats, LoopStats::default());
        assert_eq!(detector.calls(), 0);
        assert_eq!(h.board.current(), Status::camera_active());
    }
}
