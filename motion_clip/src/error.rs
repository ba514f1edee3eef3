//! Error types for the motion recording pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for motion recording operations.
pub type MotionResult<T> = Result<T, MotionError>;

/// Errors that can occur while ingesting frames or writing clips.
#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Output folder is unavailable: {0}")]
    OutputFolderUnavailable(PathBuf),

    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(f64),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Frame source error: {0}")]
    Source(String),

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Encoder failed: {message}")]
    EncoderFailed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
    FrameSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Clip writer panicked: {0}")]
    WriterPanicked(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MotionError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a frame source error.
    pub fn source_failed(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    /// Create an encoder failure error.
    pub fn encoder_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::EncoderFailed {
            message: message.into(),
            exit_code,
        }
    }
}
