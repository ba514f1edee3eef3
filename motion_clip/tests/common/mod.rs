#![allow(dead_code)]

use image::{GrayImage, Luma, RgbImage};
use motion_clip::core_modules::background_model::ForegroundMasker;
use motion_clip::core_modules::encoder::{ClipEncoder, EncoderFactory};
use motion_clip::core_modules::frame::Frame;
use motion_clip::core_modules::frame_source::{FramePayload, FrameSource, SourceItem};
use motion_clip::{MotionConfig, MotionError, MotionResult};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 16;

/// A config the synthetic streams trigger reliably: any full-frame mask is motion.
pub fn test_config(output_folder: &Path) -> MotionConfig {
    MotionConfig {
        min_contour_area: 10,
        kernel_size: 3,
        output_folder: output_folder.to_path_buf(),
        source_id: Some("testcam".to_string()),
        ..Default::default()
    }
}

/// Reports a full foreground mask on the calls whose index falls in one of
/// `ranges`, and an empty mask otherwise.
pub struct ScriptedMasker {
    ranges: Vec<Range<u64>>,
    calls: u64,
}

impl ScriptedMasker {
    pub fn new(ranges: Vec<Range<u64>>) -> Self {
        Self { ranges, calls: 0 }
    }
}

impl ForegroundMasker for ScriptedMasker {
    fn apply(&mut self, frame: &RgbImage) -> GrayImage {
        let moving = self.ranges.iter().any(|r| r.contains(&self.calls));
        self.calls += 1;
        let value = if moving { 255 } else { 0 };
        GrayImage::from_pixel(frame.width(), frame.height(), Luma([value]))
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecordedClip {
    pub frames: Vec<u64>,
    pub finished: u32,
}

/// Encoders that record frame indices per clip path instead of writing files.
#[derive(Default)]
pub struct MemoryEncoderFactory {
    clips: Arc<Mutex<BTreeMap<PathBuf, RecordedClip>>>,
    opened: Mutex<usize>,
    /// Zero-based numbers of the encoders whose first write fails.
    failing: Vec<usize>,
    /// Time each write takes, so writers fall behind the ingestion loop.
    write_delay: Option<Duration>,
}

impl MemoryEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failing: Vec<usize>) -> Self {
        Self {
            failing,
            ..Self::default()
        }
    }

    pub fn slow(write_delay: Duration) -> Self {
        Self {
            write_delay: Some(write_delay),
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> BTreeMap<PathBuf, RecordedClip> {
        self.clips.lock().unwrap().clone()
    }
}

impl EncoderFactory for MemoryEncoderFactory {
    fn open(&self, path: &Path, _fps: f64, resolution: (u32, u32)) -> MotionResult<Box<dyn ClipEncoder>> {
        assert_eq!(resolution, (WIDTH, HEIGHT));
        let mut opened = self.opened.lock().unwrap();
        let number = *opened;
        *opened += 1;
        self.clips.lock().unwrap().insert(path.to_path_buf(), RecordedClip::default());
        Ok(Box::new(MemoryEncoder {
            path: path.to_path_buf(),
            clips: Arc::clone(&self.clips),
            fail: self.failing.contains(&number),
            write_delay: self.write_delay,
        }))
    }
}

struct MemoryEncoder {
    path: PathBuf,
    clips: Arc<Mutex<BTreeMap<PathBuf, RecordedClip>>>,
    fail: bool,
    write_delay: Option<Duration>,
}

impl ClipEncoder for MemoryEncoder {
    fn write_frame(&mut self, frame: &Frame) -> MotionResult<()> {
        if self.fail {
            return Err(MotionError::encoder_failed("simulated encoder crash", Some(1)));
        }
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        if let Some(clip) = self.clips.lock().unwrap().get_mut(&self.path) {
            clip.frames.push(frame.index);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> MotionResult<()> {
        if let Some(clip) = self.clips.lock().unwrap().get_mut(&self.path) {
            clip.finished += 1;
        }
        Ok(())
    }
}

/// Black frames grouped into named clips, with an optional hook that runs just
/// before a given item is handed out.
pub struct SyntheticSource {
    fps: f64,
    pending: VecDeque<(String, u64)>,
    current: Option<(String, u64)>,
    produced: u64,
    hook: Option<(u64, Box<dyn FnMut()>)>,
}

impl SyntheticSource {
    pub fn new(fps: f64, clips: &[(&str, u64)]) -> Self {
        Self {
            fps,
            pending: clips.iter().map(|(name, n)| (name.to_string(), *n)).collect(),
            current: None,
            produced: 0,
            hook: None,
        }
    }

    pub fn single(fps: f64, frames: u64) -> Self {
        Self::new(fps, &[("session", frames)])
    }

    pub fn with_hook(mut self, at_item: u64, hook: impl FnMut() + 'static) -> Self {
        self.hook = Some((at_item, Box::new(hook)));
        self
    }
}

impl FrameSource for SyntheticSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_clip(&mut self) -> Option<String> {
        self.current = self.pending.pop_front();
        self.current.as_ref().map(|(name, _)| name.clone())
    }

    fn next_item(&mut self) -> Option<MotionResult<SourceItem>> {
        loop {
            if let Some((name, remaining)) = self.current.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    if let Some((at, hook)) = self.hook.as_mut() {
                        if *at == self.produced {
                            hook();
                        }
                    }
                    self.produced += 1;
                    return Some(Ok(SourceItem {
                        clip: name.clone(),
                        payload: FramePayload::Raw(RgbImage::new(WIDTH, HEIGHT)),
                    }));
                }
            }
            self.next_clip()?;
        }
    }
}

/// Checks that no frame was written twice and each clip is in capture order.
pub fn assert_clips_consistent(recorded: &BTreeMap<PathBuf, RecordedClip>) {
    let mut seen = std::collections::HashSet::new();
    for (path, clip) in recorded {
        assert_eq!(clip.finished, 1, "{} must be finished exactly once", path.display());
        assert!(
            clip.frames.windows(2).all(|w| w[0] < w[1]),
            "{} is out of order",
            path.display()
        );
        for index in &clip.frames {
            assert!(seen.insert(*index), "frame {index} written twice");
        }
    }
}
