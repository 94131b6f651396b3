use std::sync::{Arc, Mutex, PoisonError};

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};

use crate::overlay::domain::drawing_surface::{DrawingSurface, RectStyle};
use crate::shared::frame::Frame;
use crate::shared::geometry::ScaledRect;

/// Raster overlay layer drawn into an RGBA buffer.
///
/// Drawing happens on a private staging buffer; `present` copies the
/// finished layer into the buffer shared with [`CanvasView`]s, so readers
/// only ever see whole redraws.
pub struct ImageCanvas {
    staging: RgbaImage,
    published: Arc<Mutex<RgbaImage>>,
}

impl ImageCanvas {
    pub fn new() -> Self {
        Self {
            staging: RgbaImage::new(0, 0),
            published: Arc::new(Mutex::new(RgbaImage::new(0, 0))),
        }
    }

    /// A read-only handle on the presented layer.
    pub fn view(&self) -> CanvasView {
        CanvasView {
            published: self.published.clone(),
        }
    }
}

impl Default for ImageCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingSurface for ImageCanvas {
    fn set_dimensions(&mut self, width: u32, height: u32) {
        self.staging = RgbaImage::new(width, height);
    }

    fn clear(&mut self) {
        for p in self.staging.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    fn add_rect(&mut self, rect: &ScaledRect, style: &RectStyle) {
        draw_rect(&mut self.staging, rect, style);
    }

    fn present(&mut self) {
        let layer = self.staging.clone();
        *self.published.lock().unwrap_or_else(PoisonError::into_inner) = layer;
    }
}

/// Shared, cloneable reader of the last presented overlay layer.
#[derive(Clone)]
pub struct CanvasView {
    published: Arc<Mutex<RgbaImage>>,
}

impl CanvasView {
    pub fn snapshot(&self) -> RgbaImage {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Scales `frame` to the canvas size and blends the overlay on top.
    ///
    /// Before the first redraw the canvas has no size and the frame is
    /// returned unchanged.
    pub fn composite(&self, frame: &Frame) -> Result<Frame, Box<dyn std::error::Error>> {
        let layer = self.snapshot();
        let (w, h) = layer.dimensions();
        if w == 0 || h == 0 {
            return Ok(frame.clone());
        }

        let base = frame.to_rgb_image().ok_or("Frame is not RGB")?;
        let scaled = imageops::resize(&base, w, h, FilterType::Triangle);
        let mut out = DynamicImage::ImageRgb8(scaled).into_rgba8();
        imageops::overlay(&mut out, &layer, 0, 0);

        let rgb = DynamicImage::ImageRgba8(out).into_rgb8();
        Ok(Frame::from_rgb_image(rgb, frame.index()).with_pts_ms(frame.pts_ms()))
    }
}

/// Strokes (and optionally fills) `rect`, clipped to the image.
///
/// The stroke lies inside the rectangle's bounds.
fn draw_rect(img: &mut RgbaImage, rect: &ScaledRect, style: &RectStyle) {
    let (w, h) = img.dimensions();
    let x0 = rect.x.round() as i64;
    let y0 = rect.y.round() as i64;
    let x1 = rect.right().round() as i64 - 1;
    let y1 = rect.bottom().round() as i64 - 1;
    if x1 < x0 || y1 < y0 {
        return;
    }

    let t = style.stroke_width as i64;
    let stroke = Rgba([style.stroke[0], style.stroke[1], style.stroke[2], 255]);
    let fill = style.fill.map(|c| Rgba([c[0], c[1], c[2], 255]));

    let cx0 = x0.max(0);
    let cy0 = y0.max(0);
    let cx1 = x1.min(w as i64 - 1);
    let cy1 = y1.min(h as i64 - 1);

    for y in cy0..=cy1 {
        for x in cx0..=cx1 {
            let on_stroke = x < x0 + t || x > x1 - t || y < y0 + t || y > y1 - t;
            let color = if on_stroke { Some(stroke) } else { fill };
            if let Some(c) = color {
                img.put_pixel(x as u32, y as u32, c);
            }
        }
    }
}
