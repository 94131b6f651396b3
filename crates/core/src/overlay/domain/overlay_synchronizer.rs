use thiserror::Error;

use crate::overlay::domain::drawing_surface::{DrawingSurface, RectStyle};
use crate::shared::display_surface::DisplaySurface;
use crate::shared::geometry::{DetectionBox, Scale, ScaledRect};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayError {
    #[error("display surface not ready (intrinsic size {width}x{height})")]
    NotReady { width: u32, height: u32 },
}

/// Scale factors from intrinsic to displayed pixels.
///
/// Recomputed on every call so a resize of the displayed video is honoured
/// on the next cycle without any resize notification.
pub fn compute_scale(surface: &DisplaySurface) -> Result<Scale, OverlayError> {
    if !surface.is_ready() {
        return Err(OverlayError::NotReady {
            width: surface.intrinsic_width,
            height: surface.intrinsic_height,
        });
    }
    Ok(Scale {
        x: surface.displayed_width as f64 / surface.intrinsic_width as f64,
        y: surface.displayed_height as f64 / surface.intrinsic_height as f64,
    })
}

pub fn map_box(b: &DetectionBox, scale: Scale) -> ScaledRect {
    ScaledRect {
        x: b.x * scale.x,
        y: b.y * scale.y,
        width: b.width * scale.x,
        height: b.height * scale.y,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedrawOutcome {
    Applied { rects: usize },
    /// Geometry was unavailable; the previous overlay was left in place.
    Skipped,
}

/// Keeps a drawing surface consistent with the latest detection batch.
///
/// Owns the surface and the set of rectangles currently on it. After each
/// applied redraw that set is exactly the mapped batch, never a mix of two.
pub struct OverlaySynchronizer<S: DrawingSurface> {
    surface: S,
    style: RectStyle,
    state: Vec<ScaledRect>,
    canvas_size: Option<(u32, u32)>,
}

impl<S: DrawingSurface> OverlaySynchronizer<S> {
    pub fn new(surface: S, style: RectStyle) -> Self {
        Self {
            surface,
            style,
            state: Vec::new(),
            canvas_size: None,
        }
    }

    /// Replaces the overlay with `batch` mapped through `geometry`.
    ///
    /// The whole batch is mapped before the surface is touched, and the
    /// clear/add/present sequence runs under one exclusive borrow.
    pub fn redraw(&mut self, batch: &[DetectionBox], geometry: &DisplaySurface) -> RedrawOutcome {
        let scale = match compute_scale(geometry) {
            Ok(scale) => scale,
            Err(e) => {
                log::debug!("Skipping redraw: {e}");
                return RedrawOutcome::Skipped;
            }
        };
        let rects: Vec<ScaledRect> = batch.iter().map(|b| map_box(b, scale)).collect();

        let size = (geometry.displayed_width, geometry.displayed_height);
        if self.canvas_size != Some(size) {
            self.surface.set_dimensions(size.0, size.1);
            self.canvas_size = Some(size);
        }

        self.surface.clear();
        for rect in &rects {
            self.surface.add_rect(rect, &self.style);
        }
        self.surface.present();

        self.state = rects;
        RedrawOutcome::Applied {
            rects: self.state.len(),
        }
    }

    /// Sizes the surface to the displayed video as soon as geometry is
    /// ready, without waiting for a detection.
    ///
    /// On a size change the current rectangles are rescaled to the new
    /// displayed size and re-presented; intrinsic size is fixed for one
    /// video, so this equals re-mapping the last batch. Returns whether
    /// the surface was resized.
    pub fn sync_dimensions(&mut self, geometry: &DisplaySurface) -> bool {
        if !geometry.is_ready() {
            return false;
        }
        let size = (geometry.displayed_width, geometry.displayed_height);
        if self.canvas_size == Some(size) {
            return false;
        }

        if let Some((old_w, old_h)) = self.canvas_size.filter(|&(w, h)| w > 0 && h > 0) {
            let factor = Scale {
                x: size.0 as f64 / old_w as f64,
                y: size.1 as f64 / old_h as f64,
            };
            self.state = self
                .state
                .iter()
                .map(|r| {
                    map_box(
                        &DetectionBox::new(r.x, r.y, r.width, r.height),
                        factor,
                    )
                })
                .collect();
        }

        self.surface.set_dimensions(size.0, size.1);
        self.canvas_size = Some(size);
        self.surface.clear();
        for rect in &self.state {
            self.surface.add_rect(rect, &self.style);
        }
        self.surface.present();
        true
    }

    /// Removes every rectangle from the surface.
    pub fn teardown(&mut self) {
        self.state.clear();
        self.surface.clear();
        self.surface.present();
    }

    /// The rectangles currently materialised on the surface.
    pub fn redraw_state(&self) -> &[ScaledRect] {
        &self.state
    }

    pub fn style(&self) -> &RectStyle {
        &self.style
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }
}
