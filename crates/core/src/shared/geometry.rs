/// A face bounding box in intrinsic video pixels, origin top-left.
///
/// Produced by a detector once per polling cycle. A batch may contain
/// overlapping or duplicate boxes; all of them are drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DetectionBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a box from `(x1, y1)`-`(x2, y2)` corners.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }
}

/// Per-axis factors that map intrinsic pixels onto displayed pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

/// A rectangle in displayed (canvas) pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaledRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScaledRect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}
