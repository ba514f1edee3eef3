// THEORY:
// The `config` module holds every tunable of a recording run. The values are
// grouped in one serde-friendly struct so a field deployment can ship a JSON
// file next to the binary, while the defaults mirror the values the camera
// rigs have been running with. Everything that depends on the stream's frame
// rate (buffer capacity, delay tolerance, split length) is derived later, once
// the frame source has reported its fps.

use crate::error::{MotionError, MotionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Background-subtraction algorithm used to build the foreground mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// Per-pixel running Gaussian model.
    #[default]
    #[serde(rename = "MOG2", alias = "mog2")]
    Mog2,
    /// Pixel-stability counting model.
    #[serde(rename = "CNT", alias = "cnt")]
    Cnt,
}

impl std::str::FromStr for Algorithm {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MOG2" => Ok(Self::Mog2),
            "CNT" => Ok(Self::Cnt),
            other => Err(MotionError::config(format!("unknown algorithm '{other}'"))),
        }
    }
}

/// Settings handed to the ffmpeg encoder for every clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Video codec passed to `-c:v`.
    pub codec: String,
    /// Constant rate factor (quality).
    pub crf: u8,
    /// Encoder speed preset.
    pub preset: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            crf: 23,
            preset: "veryfast".to_string(),
        }
    }
}

/// Configuration for a single recording run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub algorithm: Algorithm,
    /// When false, episodes are still logged but no clip is written.
    pub save_video: bool,
    /// Minimum blob area, in pixels, that counts as motion.
    pub min_contour_area: u32,
    /// Seconds of footage kept before motion is recognized.
    pub buffer_seconds: f64,
    /// Seconds of continuous stillness tolerated before an episode ends.
    pub delay_seconds: f64,
    /// Length after which an ongoing clip is force-split.
    pub max_clip_minutes: f64,
    /// Variance threshold of the background model.
    pub bgsub_threshold: f64,
    /// Side length of the elliptical structuring element.
    pub kernel_size: u32,
    /// Number of morphological open passes.
    pub morph_iterations: u32,
    /// Intensity above which a mask pixel counts as foreground.
    pub threshold_value: u8,
    /// Folder receiving the clips. Must exist for the whole run.
    pub output_folder: PathBuf,
    /// Prefix of every clip file name. Defaults to the host name.
    pub source_id: Option<String>,
    pub encoder: EncoderSettings,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Mog2,
            save_video: true,
            min_contour_area: 2000,
            buffer_seconds: 5.0,
            delay_seconds: 5.0,
            max_clip_minutes: 2.0,
            bgsub_threshold: 16.0,
            kernel_size: 7,
            morph_iterations: 1,
            threshold_value: 50,
            output_folder: PathBuf::from("."),
            source_id: None,
            encoder: EncoderSettings::default(),
        }
    }
}

impl MotionConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> MotionResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the episode policy meaningless.
    pub fn validate(&self) -> MotionResult<()> {
        if !(self.buffer_seconds.is_finite() && self.buffer_seconds >= 0.0) {
            return Err(MotionError::config("buffer_seconds must be a non-negative number"));
        }
        if !(self.delay_seconds.is_finite() && self.delay_seconds >= 0.0) {
            return Err(MotionError::config("delay_seconds must be a non-negative number"));
        }
        if !(self.max_clip_minutes.is_finite() && self.max_clip_minutes > 0.0) {
            return Err(MotionError::config("max_clip_minutes must be positive"));
        }
        if !(self.bgsub_threshold.is_finite() && self.bgsub_threshold > 0.0) {
            return Err(MotionError::config("bgsub_threshold must be positive"));
        }
        if self.kernel_size == 0 {
            return Err(MotionError::config("kernel_size must be at least 1"));
        }
        if let Some(id) = &self.source_id {
            if id.is_empty() || id.contains(std::path::is_separator) {
                return Err(MotionError::config(format!("invalid source_id '{id}'")));
            }
        }
        Ok(())
    }

    /// The identifier used as clip file prefix.
    pub fn resolved_source_id(&self) -> String {
        if let Some(id) = &self.source_id {
            return id.clone();
        }
        host_name().unwrap_or_else(|| "camera".to_string())
    }
}

fn host_name() -> Option<String> {
    let name = gethostname::gethostname();
    let name = name.to_string_lossy();
    let name = name.trim();
    if name.is_empty() { None } else { Some(name.to_string()) }
}
