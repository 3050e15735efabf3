use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Output file written by every job unless the caller overrides it.
pub const DEFAULT_OUTPUT_FILENAME: &str = "audio_coordenadas_estelares.wav";

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding one `<bucket>.wav` clip per pitch bucket.
    pub sample_dir: PathBuf,
    pub output_path: PathBuf,
    /// Sample rate of the mixed timeline. Clips are resampled to it.
    pub sample_rate: u32,
    pub detection: DetectionConfig,
    pub synthesis: SynthesisConfig,
    /// Candidate images, addressed by index.
    pub catalog: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_dir: PathBuf::from("samples"),
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILENAME),
            sample_rate: 44_100,
            detection: DetectionConfig::default(),
            synthesis: SynthesisConfig::default(),
            catalog: crate::catalog::default_image_urls(),
        }
    }
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Blob detector tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Contours enclosing less than this many square pixels are dropped.
    pub min_area: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { min_area: 3.0 }
    }
}

/// Parameters of one sonification run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Fixed step of the write cursor between consecutive overlays.
    pub interval_ms: u32,
    /// Keep only the first `max_stars` points in `x` order. `None` is unlimited.
    pub max_stars: Option<usize>,
    pub pitch_min: i32,
    pub pitch_max: i32,
    /// Floor on the length of the silent base track.
    pub min_duration_ms: u32,
    /// Extra room appended after the last note start.
    pub tail_ms: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            interval_ms: 350,
            max_stars: None,
            pitch_min: 25,
            pitch_max: 75,
            min_duration_ms: 10_000,
            tail_ms: 1_000,
        }
    }
}
