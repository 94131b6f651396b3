use crate::detection::domain::face_detector::DetectionFailure;
use crate::overlay::domain::drawing_surface::{DrawingSurface, RectStyle};
use crate::overlay::domain::overlay_synchronizer::{OverlaySynchronizer, RedrawOutcome};
use crate::pipeline::poll_scheduler::{
    DiscardReason, PollScheduler, PollState, RequestId, Settlement, TickDecision,
};
use crate::shared::frame::Frame;
use crate::shared::geometry::{DetectionBox, ScaledRect};
use crate::video::domain::video_source::VideoSource;

/// A detection to run against `frame`. Its result must be handed back to
/// [`OverlaySession::on_detection_complete`] with the same id.
#[derive(Debug)]
pub struct DetectionRequest {
    pub id: RequestId,
    pub frame: Frame,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Redrawn(usize),
    SkippedNotReady,
    /// The detector errored; the previous overlay stays on screen.
    DetectorFailed,
    Discarded(DiscardReason),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: usize,
    pub issued: usize,
    pub coalesced: usize,
    /// Ticks that found no frame to detect on.
    pub withdrawn: usize,
    pub redraws: usize,
    pub skipped_not_ready: usize,
    pub detector_failures: usize,
    pub discarded: usize,
}

/// One overlay session over one video.
///
/// Owns the poll scheduler and the overlay synchronizer; the video source
/// is passed into every call so its geometry is read fresh each cycle.
/// Driven from a single loop through `&mut self`.
pub struct OverlaySession<S: DrawingSurface> {
    scheduler: PollScheduler,
    synchronizer: OverlaySynchronizer<S>,
    stats: SessionStats,
    in_flight_pts_ms: Option<u64>,
    overlay_pts_ms: Option<u64>,
}

impl<S: DrawingSurface> OverlaySession<S> {
    pub fn new(surface: S, style: RectStyle) -> Self {
        Self {
            scheduler: PollScheduler::new(),
            synchronizer: OverlaySynchronizer::new(surface, style),
            stats: SessionStats::default(),
            in_flight_pts_ms: None,
            overlay_pts_ms: None,
        }
    }

    /// Handles one timer tick. Returns a request to dispatch when the
    /// scheduler is idle and the source has a frame.
    ///
    /// Every live tick also keeps the surface sized to the displayed video,
    /// so the canvas matches the video from the moment metadata loads.
    pub fn on_tick(&mut self, source: &dyn VideoSource) -> Option<DetectionRequest> {
        self.stats.ticks += 1;
        if !self.scheduler.is_cancelled() {
            self.synchronizer.sync_dimensions(&source.surface());
        }
        match self.scheduler.on_tick() {
            TickDecision::Issue(id) => match source.current_frame() {
                Some(frame) => {
                    self.stats.issued += 1;
                    self.in_flight_pts_ms = Some(frame.pts_ms());
                    Some(DetectionRequest { id, frame })
                }
                None => {
                    self.scheduler.withdraw(id);
                    self.stats.withdrawn += 1;
                    None
                }
            },
            TickDecision::Coalesced => {
                self.stats.coalesced += 1;
                None
            }
            TickDecision::Stopped => None,
        }
    }

    pub fn on_detection_complete(
        &mut self,
        id: RequestId,
        result: Result<Vec<DetectionBox>, DetectionFailure>,
        source: &dyn VideoSource,
    ) -> CycleOutcome {
        if let Settlement::Discard(reason) = self.scheduler.on_settled(id) {
            log::debug!("Discarding detection {id} ({reason:?})");
            self.stats.discarded += 1;
            return CycleOutcome::Discarded(reason);
        }
        let detected_at = self.in_flight_pts_ms.take();

        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                log::warn!("Request {id}: {e}; keeping previous overlay");
                self.stats.detector_failures += 1;
                return CycleOutcome::DetectorFailed;
            }
        };

        match self.synchronizer.redraw(&batch, &source.surface()) {
            RedrawOutcome::Applied { rects } => {
                self.stats.redraws += 1;
                self.overlay_pts_ms = detected_at;
                CycleOutcome::Redrawn(rects)
            }
            RedrawOutcome::Skipped => {
                self.stats.skipped_not_ready += 1;
                CycleOutcome::SkippedNotReady
            }
        }
    }

    /// Cancels polling and clears the overlay. Results arriving afterwards
    /// are discarded.
    pub fn teardown(&mut self) {
        self.scheduler.cancel();
        self.synchronizer.teardown();
        self.in_flight_pts_ms = None;
        self.overlay_pts_ms = None;
    }

    pub fn state(&self) -> PollState {
        self.scheduler.state()
    }

    pub fn redraw_state(&self) -> &[ScaledRect] {
        self.synchronizer.redraw_state()
    }

    /// Playback position (ms) of the frame the boxes on screen were
    /// detected on. `None` until the first redraw and after teardown.
    pub fn overlay_pts_ms(&self) -> Option<u64> {
        self.overlay_pts_ms
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn surface(&self) -> &S {
        self.synchronizer.surface()
    }

    pub fn into_surface(self) -> S {
        self.synchronizer.into_surface()
    }
}
