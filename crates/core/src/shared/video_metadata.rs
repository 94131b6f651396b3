use std::path::PathBuf;
use std::time::Duration;

use crate::shared::display_surface::{DisplaySize, DisplaySurface};

/// Frame rate assumed when a container does not report one.
const FALLBACK_FPS: f64 = 30.0;

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: usize,
    pub codec: String,
    pub source_path: Option<PathBuf>,
}

impl VideoMetadata {
    /// Wall-clock time each frame stays on screen during playback.
    pub fn frame_interval(&self) -> Duration {
        let fps = if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            FALLBACK_FPS
        };
        Duration::from_secs_f64(1.0 / fps)
    }

    /// The surface this video occupies when laid out at `displayed`.
    pub fn surface(&self, displayed: DisplaySize) -> DisplaySurface {
        let (dw, dh) = displayed.resolve(self.width, self.height);
        DisplaySurface::new(self.width, self.height, dw, dh)
    }
}
