use crate::shared::display_surface::DisplaySurface;
use crate::shared::frame::Frame;

/// The playing video as the overlay sees it.
///
/// Both methods are queried afresh on every polling cycle; implementations
/// must not assume the caller caches anything.
pub trait VideoSource: Send {
    /// Current geometry. Unready until media metadata has loaded.
    fn surface(&self) -> DisplaySurface;

    /// The frame currently on screen, if playback has produced one.
    fn current_frame(&self) -> Option<Frame>;

    /// Presentation time (ms) of the frame on screen.
    fn position_ms(&self) -> Option<u64> {
        self.current_frame().map(|frame| frame.pts_ms())
    }
}
