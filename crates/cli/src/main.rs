mod settings;
mod snapshotter;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::Receiver;

use face_overlay_core::detection::domain::face_detector::FaceDetector;
use face_overlay_core::detection::infrastructure::onnx_blazeface_detector::OnnxBlazefaceDetector;
use face_overlay_core::overlay::domain::drawing_surface::RectStyle;
use face_overlay_core::overlay::infrastructure::image_canvas::ImageCanvas;
use face_overlay_core::overlay::infrastructure::rect_list_surface::RectListSurface;
use face_overlay_core::pipeline::infrastructure::threaded_overlay_loop::{
    self, OverlayLoopConfig, OverlayLoopReport,
};
use face_overlay_core::pipeline::overlay_logger::StdoutOverlayLogger;
use face_overlay_core::pipeline::overlay_session::SessionStats;
use face_overlay_core::shared::constants::BLAZEFACE_MODEL_NAME;
use face_overlay_core::shared::display_surface::DisplaySize;
use face_overlay_core::shared::model_resolver;
use face_overlay_core::video::infrastructure::ffmpeg_reader::FfmpegReader;
use face_overlay_core::video::infrastructure::image_file_writer::ImageFileWriter;
use face_overlay_core::video::infrastructure::playback_source::PlaybackSource;

use settings::{parse_hex_color, Settings};
use snapshotter::Snapshotter;

/// How often the main thread checks for end of playback when not snapshotting.
const WATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Plays a video and overlays face-detection boxes on it.
#[derive(Parser)]
#[command(name = "face-overlay")]
struct Cli {
    /// Input video file.
    input: PathBuf,

    /// Settings file (default: the user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local BlazeFace ONNX model.
    #[arg(long)]
    model: Option<PathBuf>,

    /// URL to download the model from when it is not cached.
    #[arg(long)]
    model_url: Option<String>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Detection polling period in milliseconds.
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Displayed video width; height follows the aspect ratio if omitted.
    #[arg(long)]
    display_width: Option<u32>,

    /// Displayed video height; width follows the aspect ratio if omitted.
    #[arg(long)]
    display_height: Option<u32>,

    /// Box outline colour as #rrggbb.
    #[arg(long)]
    stroke_color: Option<String>,

    /// Box outline width in pixels.
    #[arg(long)]
    stroke_width: Option<u32>,

    /// Write composited frames with the overlay to this directory.
    #[arg(long)]
    snapshots: Option<PathBuf>,

    /// Interval between snapshots in milliseconds.
    #[arg(long)]
    snapshot_ms: Option<u64>,

    /// Stop after this many seconds instead of at the end of the video.
    #[arg(long)]
    duration: Option<f64>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let base = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    };
    let settings = merge(base, &cli);
    settings.validate()?;

    let style = RectStyle {
        stroke: settings.stroke_rgb()?,
        stroke_width: settings.stroke_width,
        fill: None,
    };
    let config = OverlayLoopConfig {
        period: Duration::from_millis(settings.poll_period_ms),
        style,
    };
    let detector = build_detector(&settings)?;

    let deadline = cli.duration.map(deadline_after).transpose()?;
    let display = DisplaySize::new(settings.display_width, settings.display_height);
    let mut playback = PlaybackSource::spawn(Box::new(FfmpegReader::new()), &cli.input, display);
    let toggles = watch_stdin();

    let result = match &cli.snapshots {
        Some(dir) => run_with_snapshots(
            &playback,
            detector,
            config,
            dir,
            Duration::from_millis(settings.snapshot_interval_ms),
            deadline,
            toggles,
        ),
        None => run_headless(&playback, detector, config, deadline, toggles),
    };

    playback.stop()?;
    result
}

fn run_headless(
    playback: &PlaybackSource,
    detector: Box<dyn FaceDetector>,
    config: OverlayLoopConfig,
    deadline: Option<Instant>,
    toggles: Option<Receiver<()>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = threaded_overlay_loop::spawn(
        Box::new(playback.view()),
        detector,
        RectListSurface::new(),
        config,
        Box::new(StdoutOverlayLogger::new()),
    );

    let watched = watch_playback(playback, deadline, toggles, WATCH_INTERVAL, || {
        Ok(!handle.is_finished())
    });

    let report = handle.stop()?;
    log_stats(&report.stats);
    watched?;
    check_report(&report)
}

fn run_with_snapshots(
    playback: &PlaybackSource,
    detector: Box<dyn FaceDetector>,
    config: OverlayLoopConfig,
    dir: &Path,
    interval: Duration,
    deadline: Option<Instant>,
    toggles: Option<Receiver<()>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let canvas = ImageCanvas::new();
    let canvas_view = canvas.view();
    let handle = threaded_overlay_loop::spawn(
        Box::new(playback.view()),
        detector,
        canvas,
        config,
        Box::new(StdoutOverlayLogger::new()),
    );

    let mut snapshotter = Snapshotter::new(
        Box::new(playback.view()),
        canvas_view,
        Box::new(ImageFileWriter::new()),
        dir.to_path_buf(),
    );
    let watched = watch_playback(playback, deadline, toggles, interval, || {
        snapshotter.capture()?;
        Ok(!handle.is_finished())
    });

    let report = handle.stop()?;
    log_stats(&report.stats);
    log::info!(
        "Wrote {} snapshots to {}",
        snapshotter.written(),
        dir.display()
    );
    watched?;
    check_report(&report)
}

/// Turns a loop that ended on its own into an error.
fn check_report<S>(report: &OverlayLoopReport<S>) -> Result<(), Box<dyn std::error::Error>> {
    match &report.failure {
        Some(reason) => Err(format!("Overlay stopped early: {reason}").into()),
        None => Ok(()),
    }
}

/// The instant `secs` seconds from now, or an error when that is not
/// representable.
fn deadline_after(secs: f64) -> Result<Instant, Box<dyn std::error::Error>> {
    let span = Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("Invalid duration {secs}: {e}"))?;
    Instant::now()
        .checked_add(span)
        .ok_or_else(|| format!("Duration {secs} s is too long").into())
}

/// Blocks until playback ends, the deadline passes or `on_step` returns
/// `false`. Calls `on_step` every `step` and toggles play/pause on each
/// line read from stdin.
fn watch_playback(
    playback: &PlaybackSource,
    deadline: Option<Instant>,
    toggles: Option<Receiver<()>>,
    step: Duration,
    mut on_step: impl FnMut() -> Result<bool, Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    while !playback.is_ended() && !deadline.is_some_and(|d| Instant::now() >= d) {
        std::thread::sleep(step);
        if let Some(rx) = &toggles {
            while rx.try_recv().is_ok() {
                let playing = playback.toggle_play_pause();
                log::info!("{}", if playing { "Playing" } else { "Paused" });
            }
        }
        if !on_step()? {
            break;
        }
    }

    match playback.error() {
        Some(e) => Err(format!("Playback failed: {e}").into()),
        None => Ok(()),
    }
}

/// Forwards each line typed on an interactive stdin as a play/pause toggle.
fn watch_stdin() -> Option<Receiver<()>> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return None;
    }
    log::info!("Press Enter to play/pause");
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for line in stdin.lines() {
            if line.is_err() || tx.send(()).is_err() {
                break;
            }
        }
    });
    Some(rx)
}

fn build_detector(settings: &Settings) -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> {
    let model_path = match &settings.model_path {
        Some(path) => path.clone(),
        None => {
            log::info!("Resolving model: {BLAZEFACE_MODEL_NAME}");
            let path = model_resolver::resolve(
                BLAZEFACE_MODEL_NAME,
                settings.model_url.as_deref(),
                None,
                Some(Box::new(download_progress)),
            )?;
            eprintln!();
            path
        }
    };
    Ok(Box::new(OnnxBlazefaceDetector::new(
        &model_path,
        settings.confidence,
    )?))
}

/// CLI flags take precedence over the settings file.
fn merge(mut settings: Settings, cli: &Cli) -> Settings {
    if let Some(v) = cli.poll_ms {
        settings.poll_period_ms = v;
    }
    if let Some(v) = cli.confidence {
        settings.confidence = v;
    }
    if let Some(v) = &cli.stroke_color {
        settings.stroke_color = v.clone();
    }
    if let Some(v) = cli.stroke_width {
        settings.stroke_width = v;
    }
    if cli.display_width.is_some() || cli.display_height.is_some() {
        settings.display_width = cli.display_width;
        settings.display_height = cli.display_height;
    }
    if let Some(v) = &cli.model {
        settings.model_path = Some(v.clone());
    }
    if let Some(v) = &cli.model_url {
        settings.model_url = Some(v.clone());
    }
    if let Some(v) = cli.snapshot_ms {
        settings.snapshot_interval_ms = v;
    }
    settings
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.input.exists() {
        return Err(format!("Input file not found: {}", cli.input.display()).into());
    }
    if let Some(model) = &cli.model {
        if !model.exists() {
            return Err(format!("Model file not found: {}", model.display()).into());
        }
    }
    if let Some(color) = &cli.stroke_color {
        parse_hex_color(color)?;
    }
    if let Some(secs) = cli.duration {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(format!("Duration must be a positive number of seconds, got {secs}").into());
        }
    }
    if cli.snapshot_ms.is_some() && cli.snapshots.is_none() {
        return Err("--snapshot-ms requires --snapshots".into());
    }
    Ok(())
}

fn log_stats(stats: &SessionStats) {
    log::info!(
        "Session: {} ticks, {} requests, {} coalesced, {} redraws, {} skipped (not ready), {} detector failures, {} discarded",
        stats.ticks,
        stats.issued,
        stats.coalesced,
        stats.redraws,
        stats.skipped_not_ready,
        stats.detector_failures,
        stats.discarded
    );
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use face_overlay_core::shared::frame::Frame;
    use face_overlay_core::shared::video_metadata::VideoMetadata;
    use face_overlay_core::video::domain::video_reader::{FrameResult, VideoReader};

    /// Plays `frames` tiny frames at `fps`, or fails to open.
    struct FakeReader {
        frames: usize,
        fps: f64,
        fail_open: bool,
    }

    impl VideoReader for FakeReader {
        fn open(&mut self, path: &Path) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
            if self.fail_open {
                return Err("unsupported container".into());
            }
            Ok(VideoMetadata {
                width: 4,
                height: 4,
                fps: self.fps,
                total_frames: self.frames,
                codec: "fake".to_string(),
                source_path: Some(path.to_path_buf()),
            })
        }

        fn frames(&mut self) -> Box<dyn Iterator<Item = FrameResult> + '_> {
            Box::new((0..self.frames).map(|i| Ok(Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 3, i))))
        }

        fn close(&mut self) {}
    }

    fn playback(frames: usize, fps: f64, fail_open: bool) -> PlaybackSource {
        PlaybackSource::spawn(
            Box::new(FakeReader {
                frames,
                fps,
                fail_open,
            }),
            Path::new("clip.mp4"),
            DisplaySize::default(),
        )
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("face-overlay").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_merge_flags_override_settings() {
        let base = Settings {
            poll_period_ms: 250,
            confidence: 0.8,
            display_width: Some(1280),
            display_height: Some(720),
            ..Settings::default()
        };
        let merged = merge(
            base,
            &cli(&[
                "clip.mp4",
                "--poll-ms",
                "40",
                "--display-width",
                "320",
                "--stroke-color",
                "#00ff00",
            ]),
        );

        assert_eq!(merged.poll_period_ms, 40);
        assert_eq!(merged.confidence, 0.8);
        assert_eq!(merged.display_width, Some(320));
        assert_eq!(merged.display_height, None);
        assert_eq!(merged.stroke_color, "#00ff00");
    }

    #[test]
    fn test_merge_without_flags_keeps_settings() {
        let base = Settings {
            model_url: Some("https://models.invalid/m.onnx".to_string()),
            display_width: Some(640),
            ..Settings::default()
        };
        assert_eq!(merge(base.clone(), &cli(&["clip.mp4"])), base);
    }

    #[test]
    fn test_validate_missing_input() {
        let err = validate(&cli(&["/nonexistent/clip.mp4"])).unwrap_err();
        assert!(err.to_string().contains("Input file not found"));
    }

    #[test]
    fn test_validate_rejects_bad_flags() {
        let input = tempfile::NamedTempFile::new().unwrap();
        let path = input.path().to_str().unwrap();

        assert!(validate(&cli(&[path])).is_ok());
        assert!(validate(&cli(&[path, "--duration", "0"])).is_err());
        assert!(validate(&cli(&[path, "--stroke-color", "blue"])).is_err());
        assert!(validate(&cli(&[path, "--snapshot-ms", "100"])).is_err());
        assert!(validate(&cli(&[path, "--model", "/nonexistent/m.onnx"])).is_err());
    }

    #[test]
    fn test_deadline_after_accepts_ordinary_durations() {
        let before = Instant::now();
        let deadline = deadline_after(1.5).unwrap();
        assert!(deadline >= before + Duration::from_millis(1500));
    }

    #[rstest]
    #[case::overflows_duration(1e20)]
    #[case::overflows_clock(1e19)]
    #[case::not_a_number(f64::NAN)]
    #[case::negative(-1.0)]
    fn test_deadline_after_rejects_unrepresentable(#[case] secs: f64) {
        assert!(deadline_after(secs).is_err());
    }

    #[test]
    fn test_watch_playback_returns_when_video_ends() {
        let mut playback = playback(3, 500.0, false);
        let mut steps = 0;

        let watched = watch_playback(&playback, None, None, Duration::from_millis(2), || {
            steps += 1;
            Ok(true)
        });

        assert!(watched.is_ok());
        assert!(playback.is_ended());
        assert!(steps > 0);
        playback.stop().unwrap();
    }

    #[test]
    fn test_watch_playback_reports_open_failure() {
        let mut playback = playback(1, 30.0, true);

        let err = watch_playback(&playback, None, None, Duration::from_millis(2), || Ok(true))
            .unwrap_err();

        assert!(err.to_string().contains("Playback failed: unsupported container"));
        playback.stop().unwrap();
    }

    #[test]
    fn test_watch_playback_stops_at_deadline() {
        let mut playback = playback(100_000, 100.0, false);
        let deadline = Instant::now() + Duration::from_millis(40);

        watch_playback(&playback, Some(deadline), None, Duration::from_millis(5), || Ok(true))
            .unwrap();

        assert!(Instant::now() >= deadline);
        assert!(!playback.is_ended());
        playback.stop().unwrap();
    }

    #[test]
    fn test_watch_playback_stops_when_step_declines() {
        let mut playback = playback(100_000, 100.0, false);
        let mut steps = 0;

        watch_playback(&playback, None, None, Duration::from_millis(2), || {
            steps += 1;
            Ok(steps < 3)
        })
        .unwrap();

        assert_eq!(steps, 3);
        assert!(!playback.is_ended());
        playback.stop().unwrap();
    }

    #[test]
    fn test_watch_playback_propagates_step_error() {
        let mut playback = playback(100_000, 100.0, false);

        let err = watch_playback(&playback, None, None, Duration::from_millis(2), || {
            Err("disk full".into())
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        playback.stop().unwrap();
    }

    #[test]
    fn test_check_report_surfaces_loop_failure() {
        let mut report = OverlayLoopReport {
            surface: (),
            redraw_state: Vec::new(),
            stats: SessionStats::default(),
            failure: None,
        };
        assert!(check_report(&report).is_ok());

        report.failure = Some("Detector worker exited unexpectedly".to_string());
        let err = check_report(&report).unwrap_err();
        assert!(err.to_string().contains("Detector worker exited unexpectedly"));
    }
}
