use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use face_overlay_core::detection::infrastructure::onnx_blazeface_detector::DEFAULT_CONFIDENCE;
use face_overlay_core::shared::constants::{
    DEFAULT_POLL_PERIOD_MS, DEFAULT_SNAPSHOT_INTERVAL_MS, DEFAULT_STROKE_COLOR,
    DEFAULT_STROKE_WIDTH,
};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid stroke colour '{0}', expected #rrggbb")]
    Color(String),
    #[error("{0}")]
    Invalid(String),
}

/// Persistent viewer settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll_period_ms: u64,
    pub confidence: f64,
    pub stroke_color: String,
    pub stroke_width: u32,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    pub model_path: Option<PathBuf>,
    pub model_url: Option<String>,
    pub snapshot_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let [r, g, b] = DEFAULT_STROKE_COLOR;
        Self {
            poll_period_ms: DEFAULT_POLL_PERIOD_MS,
            confidence: DEFAULT_CONFIDENCE,
            stroke_color: format!("#{r:02x}{g:02x}{b:02x}"),
            stroke_width: DEFAULT_STROKE_WIDTH,
            display_width: None,
            display_height: None,
            model_path: None,
            model_url: None,
            snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
        }
    }
}

impl Settings {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceOverlay").join("settings.json"))
    }

    /// Loads the user's settings file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::config_path().filter(|p| p.exists()) else {
            return Self::default();
        };
        Self::load_from(&path).unwrap_or_else(|e| {
            log::warn!("{e}; using default settings");
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.poll_period_ms == 0 {
            return Err(SettingsError::Invalid(
                "Poll period must be at least 1 ms".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SettingsError::Invalid(format!(
                "Confidence must be between 0.0 and 1.0, got {}",
                self.confidence
            )));
        }
        if self.stroke_width == 0 {
            return Err(SettingsError::Invalid(
                "Stroke width must be at least 1".to_string(),
            ));
        }
        if self.display_width == Some(0) || self.display_height == Some(0) {
            return Err(SettingsError::Invalid(
                "Display dimensions must be positive".to_string(),
            ));
        }
        if self.snapshot_interval_ms == 0 {
            return Err(SettingsError::Invalid(
                "Snapshot interval must be at least 1 ms".to_string(),
            ));
        }
        self.stroke_rgb().map(|_| ())
    }

    pub fn stroke_rgb(&self) -> Result<[u8; 3], SettingsError> {
        parse_hex_color(&self.stroke_color)
    }
}

/// Parses `#rrggbb` (the leading `#` is optional).
pub fn parse_hex_color(s: &str) -> Result<[u8; 3], SettingsError> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(SettingsError::Color(s.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| SettingsError::Color(s.to_string()))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}
