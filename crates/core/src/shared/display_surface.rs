/// Geometry of the video element: its native resolution and the size it is
/// rendered at.
///
/// Intrinsic dimensions are zero until media metadata has loaded; such a
/// surface is "unready" and must not be used to compute scale factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplaySurface {
    pub intrinsic_width: u32,
    pub intrinsic_height: u32,
    pub displayed_width: u32,
    pub displayed_height: u32,
}

impl DisplaySurface {
    pub fn new(
        intrinsic_width: u32,
        intrinsic_height: u32,
        displayed_width: u32,
        displayed_height: u32,
    ) -> Self {
        Self {
            intrinsic_width,
            intrinsic_height,
            displayed_width,
            displayed_height,
        }
    }

    /// A surface whose media metadata has not loaded yet.
    pub fn unready(displayed_width: u32, displayed_height: u32) -> Self {
        Self::new(0, 0, displayed_width, displayed_height)
    }

    pub fn is_ready(&self) -> bool {
        self.intrinsic_width > 0 && self.intrinsic_height > 0
    }

    /// Same media, re-laid-out at a new displayed size.
    pub fn with_displayed(self, displayed_width: u32, displayed_height: u32) -> Self {
        Self {
            displayed_width,
            displayed_height,
            ..self
        }
    }
}

/// Requested on-screen size of the video.
///
/// A missing dimension is derived from the intrinsic aspect ratio, and an
/// empty request renders at the intrinsic size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplaySize {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl DisplaySize {
    pub fn new(width: Option<u32>, height: Option<u32>) -> Self {
        Self { width, height }
    }

    /// Resolves to concrete displayed dimensions for a video of the given
    /// intrinsic size.
    pub fn resolve(&self, intrinsic_width: u32, intrinsic_height: u32) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if intrinsic_width > 0 => {
                let h = (w as f64 * intrinsic_height as f64 / intrinsic_width as f64).round();
                (w, (h as u32).max(1))
            }
            (None, Some(h)) if intrinsic_height > 0 => {
                let w = (h as f64 * intrinsic_width as f64 / intrinsic_height as f64).round();
                ((w as u32).max(1), h)
            }
            (Some(w), None) => (w, intrinsic_height),
            (None, Some(h)) => (intrinsic_width, h),
            (None, None) => (intrinsic_width, intrinsic_height),
        }
    }
}
