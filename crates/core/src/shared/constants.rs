pub const BLAZEFACE_MODEL_NAME: &str = "blazeface.onnx";

/// Detection polling period.
pub const DEFAULT_POLL_PERIOD_MS: u64 = 100;

pub const DEFAULT_STROKE_COLOR: [u8; 3] = [255, 0, 0];
pub const DEFAULT_STROKE_WIDTH: u32 = 2;

/// How often the CLI writes a composited snapshot while playing.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 500;
