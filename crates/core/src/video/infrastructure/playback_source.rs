use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::shared::display_surface::{DisplaySize, DisplaySurface};
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_reader::VideoReader;
use crate::video::domain::video_source::VideoSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Control {
    Play,
    Pause,
    Stop,
}

#[derive(Debug)]
struct PlaybackState {
    metadata: Option<VideoMetadata>,
    display: DisplaySize,
    frame: Option<Frame>,
    playing: bool,
    ended: bool,
    error: Option<String>,
}

/// Plays a local video file on a background thread.
///
/// The thread opens the file (metadata becomes available asynchronously,
/// like a media element's `loadedmetadata`), then publishes decoded frames
/// at the video's frame rate. Playback starts immediately.
pub struct PlaybackSource {
    state: Arc<Mutex<PlaybackState>>,
    control_tx: Sender<Control>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackSource {
    pub fn spawn(reader: Box<dyn VideoReader>, path: &Path, display: DisplaySize) -> Self {
        let state = Arc::new(Mutex::new(PlaybackState {
            metadata: None,
            display,
            frame: None,
            playing: true,
            ended: false,
            error: None,
        }));
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let handle = spawn_player(reader, path.to_path_buf(), state.clone(), control_rx);
        Self {
            state,
            control_tx,
            handle: Some(handle),
        }
    }

    pub fn view(&self) -> PlaybackView {
        PlaybackView {
            state: self.state.clone(),
        }
    }

    pub fn play(&self) {
        self.set_playing(true);
    }

    pub fn pause(&self) {
        self.set_playing(false);
    }

    /// Returns whether playback is running after the toggle.
    pub fn toggle_play_pause(&self) -> bool {
        let playing = !lock(&self.state).playing;
        self.set_playing(playing);
        playing
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    /// Changes the on-screen size. Picked up by the next `surface()` query.
    pub fn resize(&self, display: DisplaySize) {
        lock(&self.state).display = display;
    }

    pub fn is_ended(&self) -> bool {
        lock(&self.state).ended
    }

    /// The open or decode error that ended playback, if any.
    pub fn error(&self) -> Option<String> {
        lock(&self.state).error.clone()
    }

    pub fn metadata(&self) -> Option<VideoMetadata> {
        lock(&self.state).metadata.clone()
    }

    /// Stops the playback thread and waits for it to exit.
    pub fn stop(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let _ = self.control_tx.send(Control::Stop);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| "Playback thread panicked")?;
        }
        Ok(())
    }

    fn set_playing(&self, playing: bool) {
        lock(&self.state).playing = playing;
        let control = if playing { Control::Play } else { Control::Pause };
        let _ = self.control_tx.send(control);
    }
}

impl Drop for PlaybackSource {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Stop);
    }
}

/// Cloneable read-only handle on the playback state.
#[derive(Clone)]
pub struct PlaybackView {
    state: Arc<Mutex<PlaybackState>>,
}

impl PlaybackView {
    pub fn is_ended(&self) -> bool {
        lock(&self.state).ended
    }
}

impl VideoSource for PlaybackView {
    fn surface(&self) -> DisplaySurface {
        let state = lock(&self.state);
        match &state.metadata {
            Some(meta) => meta.surface(state.display),
            None => {
                let (dw, dh) = state.display.resolve(0, 0);
                DisplaySurface::unready(dw, dh)
            }
        }
    }

    fn current_frame(&self) -> Option<Frame> {
        lock(&self.state).frame.clone()
    }

    fn position_ms(&self) -> Option<u64> {
        lock(&self.state).frame.as_ref().map(Frame::pts_ms)
    }
}

fn lock(state: &Mutex<PlaybackState>) -> MutexGuard<'_, PlaybackState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_player(
    mut reader: Box<dyn VideoReader>,
    path: PathBuf,
    state: Arc<Mutex<PlaybackState>>,
    control_rx: Receiver<Control>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let metadata = match reader.open(&path) {
            Ok(meta) => meta,
            Err(e) => {
                log::error!("Failed to open {}: {e}", path.display());
                let mut s = lock(&state);
                s.error = Some(e.to_string());
                s.ended = true;
                return;
            }
        };
        let interval = metadata.frame_interval();
        lock(&state).metadata = Some(metadata);

        let outcome = play_frames(&mut *reader, &state, &control_rx, interval);
        reader.close();

        let mut s = lock(&state);
        match outcome {
            PlayOutcome::Ended => {
                log::info!("Playback ended");
                s.ended = true;
            }
            PlayOutcome::Failed(e) => {
                log::error!("Playback failed: {e}");
                s.error = Some(e);
                s.ended = true;
            }
            PlayOutcome::Stopped => log::debug!("Playback stopped"),
        }
    })
}

enum PlayOutcome {
    Ended,
    Stopped,
    Failed(String),
}

fn play_frames(
    reader: &mut dyn VideoReader,
    state: &Mutex<PlaybackState>,
    control_rx: &Receiver<Control>,
    interval: std::time::Duration,
) -> PlayOutcome {
    let mut playing = lock(state).playing;

    for result in reader.frames() {
        while !playing {
            match control_rx.recv() {
                Ok(Control::Play) => playing = true,
                Ok(Control::Pause) => {}
                Ok(Control::Stop) | Err(_) => return PlayOutcome::Stopped,
            }
        }

        match result {
            Ok(frame) => lock(state).frame = Some(frame),
            Err(e) => return PlayOutcome::Failed(e.to_string()),
        }

        // Hold the frame on screen for one frame interval.
        let deadline = Instant::now() + interval;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match control_rx.recv_timeout(deadline - now) {
                Ok(Control::Play) => playing = true,
                Ok(Control::Pause) => playing = false,
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    return PlayOutcome::Stopped
                }
                Err(RecvTimeoutError::Timeout) => break,
            }
        }
    }
    PlayOutcome::Ended
}
