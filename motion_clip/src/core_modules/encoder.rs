//! Clip encoders and clip file naming.
//!
//! An encoder is opened once per clip, receives frames in arrival order, and
//! must be finished explicitly so the container is flushed and finalized.

use crate::config::EncoderSettings;
use crate::core_modules::frame::Frame;
use crate::error::{MotionError, MotionResult};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::debug;

/// Sink for the frames of one clip.
pub trait ClipEncoder: Send {
    fn write_frame(&mut self, frame: &Frame) -> MotionResult<()>;

    /// Flushes and finalizes the output. Consumes the encoder so it can only
    /// happen once.
    fn finish(self: Box<Self>) -> MotionResult<()>;
}

/// Opens encoders for new clips.
pub trait EncoderFactory: Send + Sync {
    fn open(&self, path: &Path, fps: f64, resolution: (u32, u32)) -> MotionResult<Box<dyn ClipEncoder>>;
}

/// Encodes clips by piping raw RGB24 frames into an `ffmpeg` child process.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoderFactory {
    settings: EncoderSettings,
}

impl FfmpegEncoderFactory {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn open(&self, path: &Path, fps: f64, resolution: (u32, u32)) -> MotionResult<Box<dyn ClipEncoder>> {
        Ok(Box::new(FfmpegEncoder::spawn(path, fps, resolution, &self.settings)?))
    }
}

pub struct FfmpegEncoder {
    child: Child,
    stdin: ChildStdin,
    resolution: (u32, u32),
}

impl FfmpegEncoder {
    pub fn spawn(
        path: &Path,
        fps: f64,
        resolution: (u32, u32),
        settings: &EncoderSettings,
    ) -> MotionResult<Self> {
        let (width, height) = resolution;
        let mut command = Command::new("ffmpeg");
        command
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s:v")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(format!("{fps:.3}"))
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg(&settings.codec)
            .arg("-preset")
            .arg(&settings.preset)
            .arg("-crf")
            .arg(settings.crf.to_string())
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-movflags")
            .arg("+faststart")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        debug!(path = %path.display(), width, height, fps, "spawning ffmpeg encoder");

        let mut child = command.spawn().map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                MotionError::FfmpegNotFound
            } else {
                MotionError::encoder_failed(format!("failed to spawn ffmpeg: {error}"), None)
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MotionError::encoder_failed("failed to capture ffmpeg stdin", None))?;

        Ok(Self {
            child,
            stdin,
            resolution,
        })
    }
}

impl ClipEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> MotionResult<()> {
        if frame.resolution() != self.resolution {
            return Err(MotionError::FrameSizeMismatch {
                expected: self.resolution,
                actual: frame.resolution(),
            });
        }
        self.stdin.write_all(frame.as_bytes())?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> MotionResult<()> {
        let Self {
            mut child,
            mut stdin,
            ..
        } = *self;
        let flushed = stdin.flush();
        // Closing stdin is what tells ffmpeg to finalize the file.
        drop(stdin);

        let status = child.wait()?;
        flushed?;
        if !status.success() {
            return Err(MotionError::encoder_failed(
                format!("ffmpeg exited with {status}"),
                status.code(),
            ));
        }
        Ok(())
    }
}

/// `<source>_<YYYYMMDD_HHMMSS>.mp4`
pub fn clip_file_name(source_id: &str, timestamp: DateTime<Local>) -> String {
    format!("{}_{}.mp4", source_id, timestamp.format("%Y%m%d_%H%M%S"))
}

/// Hands out clip paths for one run, never the same path twice.
#[derive(Debug)]
pub struct ClipNamer {
    folder: PathBuf,
    source_id: String,
    issued: HashSet<PathBuf>,
}

impl ClipNamer {
    pub fn new(folder: impl Into<PathBuf>, source_id: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            source_id: source_id.into(),
            issued: HashSet::new(),
        }
    }

    /// Path for a clip starting at `timestamp`. A `_N` suffix is added when the
    /// plain name was already issued this run or exists on disk.
    pub fn next_path(&mut self, timestamp: DateTime<Local>) -> PathBuf {
        let plain = self.folder.join(clip_file_name(&self.source_id, timestamp));
        let mut candidate = plain.clone();
        let mut suffix = 1;
        while self.issued.contains(&candidate) || candidate.exists() {
            let stem = format!("{}_{}", self.source_id, timestamp.format("%Y%m%d_%H%M%S"));
            candidate = self.folder.join(format!("{stem}_{suffix}.mp4"));
            suffix += 1;
        }
        self.issued.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 6, 3, h, m, s)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn file_name_uses_source_and_timestamp() {
        assert_eq!(clip_file_name("weir-cam", at(7, 5, 9)), "weir-cam_20240603_070509.mp4");
    }

    #[test]
    fn namer_never_repeats_within_a_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut namer = ClipNamer::new(dir.path(), "cam");
        let first = namer.next_path(at(12, 0, 0));
        let second = namer.next_path(at(12, 0, 0));
        assert_eq!(first.file_name().unwrap(), "cam_20240603_120000.mp4");
        assert_eq!(second.file_name().unwrap(), "cam_20240603_120000_1.mp4");
    }

    #[test]
    fn namer_skips_files_already_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cam_20240603_120000.mp4"), b"").unwrap();
        let mut namer = ClipNamer::new(dir.path(), "cam");
        let path = namer.next_path(at(12, 0, 0));
        assert_eq!(path.file_name().unwrap(), "cam_20240603_120000_1.mp4");
    }
}
