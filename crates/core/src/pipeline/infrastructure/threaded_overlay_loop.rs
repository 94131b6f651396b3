use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};

use crate::detection::domain::face_detector::{DetectionFailure, FaceDetector};
use crate::overlay::domain::drawing_surface::{DrawingSurface, RectStyle};
use crate::pipeline::overlay_logger::OverlayLogger;
use crate::pipeline::overlay_session::{
    CycleOutcome, DetectionRequest, OverlaySession, SessionStats,
};
use crate::pipeline::poll_scheduler::RequestId;
use crate::shared::constants::DEFAULT_POLL_PERIOD_MS;
use crate::shared::geometry::{DetectionBox, ScaledRect};
use crate::video::domain::video_source::VideoSource;

#[derive(Clone, Copy, Debug)]
pub struct OverlayLoopConfig {
    pub period: Duration,
    pub style: RectStyle,
}

impl Default for OverlayLoopConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(DEFAULT_POLL_PERIOD_MS),
            style: RectStyle::default(),
        }
    }
}

struct DetectionResponse {
    id: RequestId,
    result: Result<Vec<DetectionBox>, DetectionFailure>,
    elapsed: Duration,
}

/// What the loop hands back once stopped.
pub struct OverlayLoopReport<S> {
    pub surface: S,
    pub redraw_state: Vec<ScaledRect>,
    pub stats: SessionStats,
    /// Set when the loop ended on its own because the detector worker died.
    pub failure: Option<String>,
}

/// Running overlay loop. Dropping the handle stops the loop without
/// waiting for it.
pub struct OverlayLoopHandle<S> {
    cancelled: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<OverlayLoopReport<S>>>,
}

impl<S> OverlayLoopHandle<S> {
    /// True once the loop thread has exited, either after `stop` was
    /// signalled or because the detector worker died.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops polling, tears the overlay down and waits for the loop thread.
    ///
    /// Once this returns no further tick, request or redraw happens. A
    /// detection still running finishes on its worker and is dropped.
    pub fn stop(mut self) -> Result<OverlayLoopReport<S>, Box<dyn std::error::Error>> {
        self.cancelled.store(true, Ordering::Relaxed);
        let _ = self.stop_tx.send(());
        let handle = self.handle.take().ok_or("Overlay loop already stopped")?;
        handle
            .join()
            .map_err(|_| "Overlay loop thread panicked".into())
    }
}

impl<S> Drop for OverlayLoopHandle<S> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancelled.store(true, Ordering::Relaxed);
            let _ = self.stop_tx.send(());
        }
    }
}

/// Starts polling `detector` against `source` every `config.period`.
///
/// Layout: `ticker → loop [session] ⇄ detector worker`. The loop thread is
/// the only owner of the session and the drawing surface.
pub fn spawn<S: DrawingSurface + 'static>(
    source: Box<dyn VideoSource>,
    detector: Box<dyn FaceDetector>,
    surface: S,
    config: OverlayLoopConfig,
    logger: Box<dyn OverlayLogger>,
) -> OverlayLoopHandle<S> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let (request_tx, request_rx) = crossbeam_channel::bounded::<DetectionRequest>(1);
    let (response_tx, response_rx) = crossbeam_channel::bounded::<DetectionResponse>(1);

    // Detached: a detection still running at stop time must not block stop().
    let _ = spawn_detector(detector, request_rx, response_tx, cancelled.clone());

    let session = OverlaySession::new(surface, config.style);
    let handle = spawn_loop(LoopParts {
        session,
        source,
        logger,
        period: config.period,
        request_tx,
        response_rx,
        stop_rx,
        cancelled: cancelled.clone(),
    });

    OverlayLoopHandle {
        cancelled,
        stop_tx,
        handle: Some(handle),
    }
}

fn spawn_detector(
    mut detector: Box<dyn FaceDetector>,
    request_rx: Receiver<DetectionRequest>,
    response_tx: Sender<DetectionResponse>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for request in request_rx {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let start = Instant::now();
            let result = detector.detect(&request.frame).map_err(DetectionFailure::from);
            let response = DetectionResponse {
                id: request.id,
                result,
                elapsed: start.elapsed(),
            };
            if response_tx.send(response).is_err() {
                break;
            }
        }
        log::debug!("Detector worker exiting");
    })
}

struct LoopParts<S: DrawingSurface> {
    session: OverlaySession<S>,
    source: Box<dyn VideoSource>,
    logger: Box<dyn OverlayLogger>,
    period: Duration,
    request_tx: Sender<DetectionRequest>,
    response_rx: Receiver<DetectionResponse>,
    stop_rx: Receiver<()>,
    cancelled: Arc<AtomicBool>,
}

fn spawn_loop<S: DrawingSurface + 'static>(
    parts: LoopParts<S>,
) -> JoinHandle<OverlayLoopReport<S>> {
    std::thread::spawn(move || {
        let LoopParts {
            mut session,
            source,
            mut logger,
            period,
            request_tx,
            response_rx,
            stop_rx,
            cancelled,
        } = parts;
        let ticker = crossbeam_channel::tick(period);
        logger.info(&format!("Overlay loop started ({} ms period)", period.as_millis()));
        let mut failure = None;

        while !cancelled.load(Ordering::Relaxed) {
            select! {
                recv(stop_rx) -> _ => break,
                recv(response_rx) -> msg => {
                    let Ok(response) = msg else {
                        // The worker also exits when it sees the cancel flag.
                        if !cancelled.load(Ordering::Relaxed) {
                            log::error!("Detector worker exited unexpectedly");
                            failure = Some("Detector worker exited unexpectedly".to_string());
                        }
                        break;
                    };
                    apply_response(&mut session, &*source, &mut *logger, response);
                }
                recv(ticker) -> _ => {
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Some(request) = session.on_tick(&*source) {
                        if request_tx.send(request).is_err() {
                            if !cancelled.load(Ordering::Relaxed) {
                                log::error!("Detector worker is gone");
                                failure = Some("Detector worker is gone".to_string());
                            }
                            break;
                        }
                    }
                }
            }
        }

        session.teardown();
        drop(request_tx);

        let stats = session.stats();
        logger.info(&format!(
            "Overlay loop stopped: {} redraws, {} coalesced ticks, {} detector failures",
            stats.redraws, stats.coalesced, stats.detector_failures
        ));
        logger.summary();

        OverlayLoopReport {
            redraw_state: session.redraw_state().to_vec(),
            stats,
            failure,
            surface: session.into_surface(),
        }
    })
}

fn apply_response<S: DrawingSurface>(
    session: &mut OverlaySession<S>,
    source: &dyn VideoSource,
    logger: &mut dyn OverlayLogger,
    response: DetectionResponse,
) {
    logger.timing("detect", response.elapsed.as_secs_f64() * 1000.0);
    let faces = response.result.as_ref().map(Vec::len).ok();

    let start = Instant::now();
    let outcome = session.on_detection_complete(response.id, response.result, source);
    if let CycleOutcome::Redrawn(_) = outcome {
        logger.timing("redraw", start.elapsed().as_secs_f64() * 1000.0);
        if let Some(n) = faces {
            logger.metric("faces", n as f64);
        }
        if let (Some(detected), Some(now)) = (session.overlay_pts_ms(), source.position_ms()) {
            log::debug!("Request {}: boxes from {detected} ms shown at {now} ms", response.id);
            logger.metric("overlay_lag_ms", now.saturating_sub(detected) as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use crate::pipeline::overlay_logger::NullOverlayLogger;
    use crate::shared::display_surface::DisplaySurface;
    use crate::shared::frame::Frame;

    struct StillSource {
        ready: bool,
        with_frame: bool,
    }

    impl VideoSource for StillSource {
        fn surface(&self) -> DisplaySurface {
            if self.ready {
                DisplaySurface::new(100, 100, 50, 50)
            } else {
                DisplaySurface::unready(50, 50)
            }
        }
        fn current_frame(&self) -> Option<Frame> {
            self.with_frame
                .then(|| Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 3, 0))
        }
    }

    fn ready_source() -> Box<dyn VideoSource> {
        Box::new(StillSource {
            ready: true,
            with_frame: true,
        })
    }

    /// Reports the frame at 1000 ms while playback has moved on to 1040 ms.
    struct LaggingSource;

    impl VideoSource for LaggingSource {
        fn surface(&self) -> DisplaySurface {
            DisplaySurface::new(100, 100, 50, 50)
        }
        fn current_frame(&self) -> Option<Frame> {
            Some(Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 3, 0).with_pts_ms(1_000))
        }
        fn position_ms(&self) -> Option<u64> {
            Some(1_040)
        }
    }

    /// Answers every call with one box, optionally waiting for a go signal.
    struct FakeDetector {
        calls: Arc<AtomicUsize>,
        gate: Option<Receiver<()>>,
        fail: bool,
        panic: bool,
    }

    impl FakeDetector {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                calls,
                gate: None,
                fail: false,
                panic: false,
            }
        }
    }

    impl FaceDetector for FakeDetector {
        fn detect(
            &mut self,
            _frame: &Frame,
        ) -> Result<Vec<DetectionBox>, Box<dyn std::error::Error>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            if self.panic {
                panic!("model runtime crashed");
            }
            if self.fail {
                return Err("inference error".into());
            }
            Ok(vec![DetectionBox::new(20.0, 20.0, 10.0, 10.0)])
        }
    }

    /// Publishes every presented batch so tests can watch from outside.
    #[derive(Clone, Default)]
    struct ObservedSurface {
        pending: Vec<ScaledRect>,
        presented: Arc<Mutex<Vec<Vec<ScaledRect>>>>,
    }

    impl DrawingSurface for ObservedSurface {
        fn clear(&mut self) {
            self.pending.clear();
        }
        fn add_rect(&mut self, rect: &ScaledRect, _style: &RectStyle) {
            self.pending.push(*rect);
        }
        fn present(&mut self) {
            self.presented.lock().unwrap().push(self.pending.clone());
        }
    }

    /// Shares recorded metrics with the test thread.
    #[derive(Clone, Default)]
    struct RecordingLogger {
        metrics: Arc<Mutex<Vec<(String, f64)>>>,
    }

    impl OverlayLogger for RecordingLogger {
        fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
        fn metric(&mut self, name: &str, value: f64) {
            self.metrics.lock().unwrap().push((name.to_string(), value));
        }
        fn info(&mut self, _message: &str) {}
    }

    fn config(period_ms: u64) -> OverlayLoopConfig {
        OverlayLoopConfig {
            period: Duration::from_millis(period_ms),
            ..OverlayLoopConfig::default()
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_redraws_scaled_boxes_then_clears_on_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let surface = ObservedSurface::default();
        let presented = surface.presented.clone();
        let handle = spawn(
            ready_source(),
            Box::new(FakeDetector::new(calls.clone())),
            surface,
            config(5),
            Box::new(NullOverlayLogger),
        );

        assert!(wait_until(Duration::from_secs(2), || {
            let batches = presented.lock().unwrap();
            batches.iter().filter(|b| !b.is_empty()).count() >= 2
        }));
        let report = handle.stop().unwrap();

        let batches = presented.lock().unwrap().clone();
        // The first tick sizes the canvas before any detection lands.
        assert!(batches[0].is_empty());
        assert_eq!(
            batches.iter().find(|b| !b.is_empty()),
            Some(&vec![ScaledRect {
                x: 10.0,
                y: 10.0,
                width: 5.0,
                height: 5.0
            }])
        );
        assert_eq!(batches.last(), Some(&Vec::new()));
        assert!(report.redraw_state.is_empty());
        assert!(report.stats.redraws >= 2);
        assert!(report.failure.is_none());
    }

    #[test]
    fn test_outstanding_request_blocks_further_detect_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let mut detector = FakeDetector::new(calls.clone());
        detector.gate = Some(gate_rx);
        let handle = spawn(
            ready_source(),
            Box::new(detector),
            ObservedSurface::default(),
            config(2),
            Box::new(NullOverlayLogger),
        );

        assert!(wait_until(Duration::from_secs(2), || {
            calls.load(Ordering::SeqCst) == 1
        }));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate_tx.send(()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            calls.load(Ordering::SeqCst) == 2
        }));

        let report = handle.stop().unwrap();
        drop(gate_tx);
        assert!(report.stats.coalesced > 0);
    }

    #[test]
    fn test_stop_with_request_in_flight_discards_late_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let mut detector = FakeDetector::new(calls.clone());
        detector.gate = Some(gate_rx);
        let surface = ObservedSurface::default();
        let presented = surface.presented.clone();
        let handle = spawn(
            ready_source(),
            Box::new(detector),
            surface,
            config(2),
            Box::new(NullOverlayLogger),
        );
        assert!(wait_until(Duration::from_secs(2), || {
            calls.load(Ordering::SeqCst) == 1
        }));

        let report = handle.stop().unwrap();
        gate_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(report.redraw_state.is_empty());
        assert_eq!(report.stats.redraws, 0);
        assert!(report.failure.is_none());
        assert!(presented.lock().unwrap().iter().all(Vec::is_empty));
    }

    #[test]
    fn test_detector_panic_ends_loop_with_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut detector = FakeDetector::new(calls.clone());
        detector.panic = true;
        let handle = spawn(
            ready_source(),
            Box::new(detector),
            ObservedSurface::default(),
            config(2),
            Box::new(NullOverlayLogger),
        );

        assert!(wait_until(Duration::from_secs(2), || handle.is_finished()));
        let report = handle.stop().unwrap();

        assert_eq!(
            report.failure.as_deref(),
            Some("Detector worker exited unexpectedly")
        );
        assert_eq!(report.stats.redraws, 0);
    }

    #[test]
    fn test_running_loop_is_not_finished() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn(
            ready_source(),
            Box::new(FakeDetector::new(calls)),
            ObservedSurface::default(),
            config(2),
            Box::new(NullOverlayLogger),
        );

        std::thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        assert!(handle.stop().unwrap().failure.is_none());
    }

    #[test]
    fn test_redraw_reports_overlay_lag_behind_playback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let logger = RecordingLogger::default();
        let metrics = logger.metrics.clone();
        let handle = spawn(
            Box::new(LaggingSource),
            Box::new(FakeDetector::new(calls)),
            ObservedSurface::default(),
            config(2),
            Box::new(logger),
        );

        assert!(wait_until(Duration::from_secs(2), || {
            metrics
                .lock()
                .unwrap()
                .iter()
                .any(|(name, _)| name == "overlay_lag_ms")
        }));
        handle.stop().unwrap();

        let metrics = metrics.lock().unwrap();
        let lag: Vec<f64> = metrics
            .iter()
            .filter(|(name, _)| name == "overlay_lag_ms")
            .map(|(_, v)| *v)
            .collect();
        assert!(lag.iter().all(|v| *v == 40.0));
        assert!(metrics.iter().any(|(name, v)| name == "faces" && *v == 1.0));
    }

    #[test]
    fn test_detector_failures_do_not_stop_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut detector = FakeDetector::new(calls.clone());
        detector.fail = true;
        let handle = spawn(
            ready_source(),
            Box::new(detector),
            ObservedSurface::default(),
            config(2),
            Box::new(NullOverlayLogger),
        );

        assert!(wait_until(Duration::from_secs(2), || {
            calls.load(Ordering::SeqCst) >= 3
        }));
        let report = handle.stop().unwrap();

        assert!(report.stats.detector_failures >= 2);
        assert_eq!(report.stats.redraws, 0);
    }

    #[test]
    fn test_no_frame_means_no_detection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn(
            Box::new(StillSource {
                ready: false,
                with_frame: false,
            }),
            Box::new(FakeDetector::new(calls.clone())),
            ObservedSurface::default(),
            config(2),
            Box::new(NullOverlayLogger),
        );

        std::thread::sleep(Duration::from_millis(30));
        let report = handle.stop().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(report.stats.withdrawn > 0);
    }

    #[test]
    fn test_unready_surface_skips_redraws() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn(
            Box::new(StillSource {
                ready: false,
                with_frame: true,
            }),
            Box::new(FakeDetector::new(calls.clone())),
            ObservedSurface::default(),
            config(2),
            Box::new(NullOverlayLogger),
        );

        assert!(wait_until(Duration::from_secs(2), || {
            calls.load(Ordering::SeqCst) >= 2
        }));
        let report = handle.stop().unwrap();

        assert_eq!(report.stats.redraws, 0);
        assert!(report.stats.skipped_not_ready >= 1);
    }
}
