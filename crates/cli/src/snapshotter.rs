use std::path::PathBuf;

use face_overlay_core::overlay::infrastructure::image_canvas::CanvasView;
use face_overlay_core::video::domain::image_writer::ImageWriter;
use face_overlay_core::video::domain::video_source::VideoSource;

/// Writes the current frame composited with the presented overlay.
///
/// A frame is written at most once, however often `capture` runs while it
/// stays on screen.
pub struct Snapshotter {
    source: Box<dyn VideoSource>,
    canvas: CanvasView,
    writer: Box<dyn ImageWriter>,
    dir: PathBuf,
    last_index: Option<usize>,
    written: usize,
}

impl Snapshotter {
    pub fn new(
        source: Box<dyn VideoSource>,
        canvas: CanvasView,
        writer: Box<dyn ImageWriter>,
        dir: PathBuf,
    ) -> Self {
        Self {
            source,
            canvas,
            writer,
            dir,
            last_index: None,
            written: 0,
        }
    }

    pub fn capture(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(frame) = self.source.current_frame() else {
            return Ok(());
        };
        if self.last_index == Some(frame.index()) {
            return Ok(());
        }
        let composite = self.canvas.composite(&frame)?;
        let path = self.dir.join(snapshot_name(frame.index()));
        self.writer.write(&path, &composite)?;
        self.last_index = Some(frame.index());
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

pub fn snapshot_name(frame_index: usize) -> String {
    format!("frame_{frame_index:05}.png")
}
