// THEORY:
// A `FrameSource` is the recorder's view of a camera or a recording. It is a
// lazy, pull-based sequence: the ingestion loop asks for one item at a time, so
// a source never decodes more than the loop can classify. Items belong to named
// "clips" (sessions): a folder of stills, one video file, one camera session.
// Each item carries its clip name, and the Run Log is keyed by it.
//
// Two sources ship with the crate:
// 1.  `ImageSequenceSource`: still images on disk. Items hold paths and are only
//     decoded when the loop resolves them.
// 2.  `VideoFileSource`: video files decoded by an `ffmpeg` child process that
//     streams raw RGB24 frames through a pipe.

use crate::error::{MotionError, MotionResult};
use image::RgbImage;
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

/// The frame of one stream item: decoded already, or a file to decode.
#[derive(Debug, Clone)]
pub enum FramePayload {
    Raw(RgbImage),
    Path(PathBuf),
}

impl FramePayload {
    /// Decodes the payload into an RGB raster.
    pub fn resolve(self) -> MotionResult<RgbImage> {
        match self {
            Self::Raw(image) => Ok(image),
            Self::Path(path) => Ok(image::open(&path)?.to_rgb8()),
        }
    }
}

/// One stream item.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Name of the clip (session) the frame belongs to.
    pub clip: String,
    pub payload: FramePayload,
}

/// A pull-based stream of frames grouped into named clips.
pub trait FrameSource {
    /// Nominal frame rate of the stream.
    fn fps(&self) -> f64;

    /// Advances to the next clip and returns its name, or `None` when exhausted.
    fn next_clip(&mut self) -> Option<String>;

    /// The next frame, moving on to the next clip when the current one ends.
    fn next_item(&mut self) -> Option<MotionResult<SourceItem>>;
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn clip_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn sorted_images(dir: &Path) -> MotionResult<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Still images on disk. A folder holding images is one clip; a folder of
/// sub-folders yields one clip per sub-folder, in name order.
pub struct ImageSequenceSource {
    fps: f64,
    pending_clips: VecDeque<(String, PathBuf)>,
    current_clip: Option<String>,
    current_frames: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    pub fn open(root: impl AsRef<Path>, fps: f64) -> MotionResult<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(MotionError::source_failed(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MotionError::InvalidFrameRate(fps));
        }

        let mut pending_clips = VecDeque::new();
        if std::fs::read_dir(root)?.flatten().any(|e| is_image(&e.path())) {
            pending_clips.push_back((clip_name(root), root.to_path_buf()));
        }
        let mut folders: Vec<PathBuf> = std::fs::read_dir(root)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        folders.sort();
        pending_clips.extend(folders.into_iter().map(|p| (clip_name(&p), p)));

        info!(root = %root.display(), clips = pending_clips.len(), fps, "image sequence opened");
        Ok(Self {
            fps,
            pending_clips,
            current_clip: None,
            current_frames: VecDeque::new(),
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_clip(&mut self) -> Option<String> {
        while let Some((name, dir)) = self.pending_clips.pop_front() {
            match sorted_images(&dir) {
                Ok(frames) if !frames.is_empty() => {
                    debug!(clip = %name, frames = frames.len(), "next clip");
                    self.current_frames = frames.into();
                    self.current_clip = Some(name.clone());
                    return Some(name);
                }
                Ok(_) => debug!(clip = %name, "skipping folder without images"),
                Err(error) => debug!(clip = %name, %error, "skipping unreadable folder"),
            }
        }
        self.current_clip = None;
        self.current_frames.clear();
        None
    }

    fn next_item(&mut self) -> Option<MotionResult<SourceItem>> {
        loop {
            if let (Some(clip), Some(path)) = (&self.current_clip, self.current_frames.pop_front()) {
                return Some(Ok(SourceItem {
                    clip: clip.clone(),
                    payload: FramePayload::Path(path),
                }));
            }
            self.next_clip()?;
        }
    }
}

/// Stream description reported by `ffprobe`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|fps: &f64| *fps > 0.0)
}

/// Probes the first video stream of `path`.
pub fn probe_video(path: &Path) -> MotionResult<VideoInfo> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                MotionError::FfmpegNotFound
            } else {
                MotionError::Io(error)
            }
        })?;

    if !output.status.success() {
        return Err(MotionError::source_failed(format!(
            "ffprobe failed for {}",
            path.display()
        )));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MotionError::source_failed(format!("no video stream in {}", path.display())))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(MotionError::source_failed(format!(
            "unknown resolution for {}",
            path.display()
        )));
    };
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| MotionError::source_failed(format!("unknown frame rate for {}", path.display())))?;

    Ok(VideoInfo { width, height, fps })
}

struct Decoder {
    clip: String,
    info: VideoInfo,
    child: Child,
    stdout: ChildStdout,
}

impl Decoder {
    fn spawn(path: &Path) -> MotionResult<Self> {
        let info = probe_video(path)?;
        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    MotionError::FfmpegNotFound
                } else {
                    MotionError::Io(error)
                }
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MotionError::source_failed("failed to capture ffmpeg stdout"))?;
        Ok(Self {
            clip: clip_name(path),
            info,
            child,
            stdout,
        })
    }

    /// `Ok(None)` at a clean end of stream.
    fn read_frame(&mut self) -> MotionResult<Option<RgbImage>> {
        let frame_size = (self.info.width * self.info.height * 3) as usize;
        let mut bytes = vec![0u8; frame_size];
        match self.stdout.read_exact(&mut bytes) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(error.into()),
        }
        RgbImage::from_raw(self.info.width, self.info.height, bytes)
            .map(Some)
            .ok_or_else(|| MotionError::source_failed("decoded frame has the wrong size"))
    }

    fn close(mut self) -> MotionResult<()> {
        drop(self.stdout);
        let status = self.child.wait()?;
        if !status.success() {
            return Err(MotionError::source_failed(format!(
                "ffmpeg decoder for {} exited with {status}",
                self.clip
            )));
        }
        Ok(())
    }
}

/// Video files decoded through `ffmpeg`, one clip per file. The stream's frame
/// rate is taken from the first file.
pub struct VideoFileSource {
    fps: f64,
    pending: VecDeque<PathBuf>,
    current: Option<Decoder>,
}

impl VideoFileSource {
    pub fn open(paths: impl IntoIterator<Item = PathBuf>) -> MotionResult<Self> {
        let pending: VecDeque<PathBuf> = paths.into_iter().collect();
        let first = pending
            .front()
            .ok_or_else(|| MotionError::source_failed("no video files given"))?;
        let fps = probe_video(first)?.fps;
        info!(files = pending.len(), fps, "video source opened");
        Ok(Self {
            fps,
            pending,
            current: None,
        })
    }

    /// Like `open`, but with a frame rate that overrides the probed one.
    pub fn open_with_fps(paths: impl IntoIterator<Item = PathBuf>, fps: f64) -> MotionResult<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MotionError::InvalidFrameRate(fps));
        }
        let mut source = Self::open(paths)?;
        source.fps = fps;
        Ok(source)
    }

    fn advance(&mut self) -> Option<MotionResult<String>> {
        let path = self.pending.pop_front()?;
        Some(Decoder::spawn(&path).map(|decoder| {
            let name = decoder.clip.clone();
            debug!(clip = %name, width = decoder.info.width, height = decoder.info.height, "decoding clip");
            self.current = Some(decoder);
            name
        }))
    }
}

impl FrameSource for VideoFileSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_clip(&mut self) -> Option<String> {
        if let Some(previous) = self.current.take() {
            let previous_clip = previous.clip.clone();
            if let Err(error) = previous.close() {
                warn!(clip = %previous_clip, %error, "decoder closed with an error");
            }
        }
        loop {
            match self.advance()? {
                Ok(name) => return Some(name),
                Err(error) => warn!(%error, "skipping undecodable file"),
            }
        }
    }

    fn next_item(&mut self) -> Option<MotionResult<SourceItem>> {
        loop {
            if let Some(decoder) = self.current.as_mut() {
                match decoder.read_frame() {
                    Ok(Some(image)) => {
                        return Some(Ok(SourceItem {
                            clip: decoder.clip.clone(),
                            payload: FramePayload::Raw(image),
                        }));
                    }
                    Ok(None) => {}
                    Err(error) => return Some(Err(error)),
                }
            }
            self.next_clip()?;
        }
    }
}
