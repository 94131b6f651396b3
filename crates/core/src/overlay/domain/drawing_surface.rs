use crate::shared::constants::{DEFAULT_STROKE_COLOR, DEFAULT_STROKE_WIDTH};
use crate::shared::geometry::ScaledRect;

/// Visual style of an overlay rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RectStyle {
    pub stroke: [u8; 3],
    pub stroke_width: u32,
    /// `None` draws the outline only.
    pub fill: Option<[u8; 3]>,
}

impl Default for RectStyle {
    fn default() -> Self {
        Self {
            stroke: DEFAULT_STROKE_COLOR,
            stroke_width: DEFAULT_STROKE_WIDTH,
            fill: None,
        }
    }
}

/// The canvas the overlay is drawn on.
///
/// Only the overlay synchronizer mutates a surface. Within one redraw it
/// calls `clear`, then `add_rect` per rectangle, then `present`; surfaces
/// observed by other threads must publish on `present` only, so a renderer
/// never sees a half-replaced batch.
pub trait DrawingSurface: Send {
    /// Called before drawing whenever the displayed size changes.
    fn set_dimensions(&mut self, _width: u32, _height: u32) {}

    fn clear(&mut self);

    fn add_rect(&mut self, rect: &ScaledRect, style: &RectStyle);

    fn present(&mut self) {}
}
