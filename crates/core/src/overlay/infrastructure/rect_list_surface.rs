use crate::overlay::domain::drawing_surface::{DrawingSurface, RectStyle};
use crate::shared::geometry::ScaledRect;

/// Headless surface that keeps the drawn rectangles as a list.
///
/// Used when no raster output is wanted; the rectangles can still be
/// logged or inspected after the loop stops.
#[derive(Debug, Default)]
pub struct RectListSurface {
    rects: Vec<(ScaledRect, RectStyle)>,
    dimensions: (u32, u32),
    presents: usize,
}

impl RectListSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rects(&self) -> impl Iterator<Item = &ScaledRect> {
        self.rects.iter().map(|(r, _)| r)
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Number of completed redraws.
    pub fn presents(&self) -> usize {
        self.presents
    }
}

impl DrawingSurface for RectListSurface {
    fn set_dimensions(&mut self, width: u32, height: u32) {
        self.dimensions = (width, height);
    }

    fn clear(&mut self) {
        self.rects.clear();
    }

    fn add_rect(&mut self, rect: &ScaledRect, style: &RectStyle) {
        self.rects.push((*rect, *style));
    }

    fn present(&mut self) {
        self.presents += 1;
    }
}
