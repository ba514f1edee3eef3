// THEORY:
// An alternative frame source that decodes through OpenCV's `VideoCapture`
// instead of an ffmpeg pipe. It accepts anything `VideoCapture` can open: files,
// RTSP URLs, or a device index given as a plain number. Each input is one clip.
// OpenCV hands out BGR frames, so every frame is converted to RGB before it
// enters the recorder.

use motion_clip::core_modules::frame_source::{FramePayload, FrameSource, SourceItem};
use motion_clip::{MotionError, MotionResult};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::collections::VecDeque;
use tracing::{debug, warn};

fn cv_error(error: opencv::Error) -> MotionError {
    MotionError::source_failed(error.to_string())
}

fn open_capture(input: &str) -> MotionResult<VideoCapture> {
    let cap = match input.parse::<i32>() {
        Ok(device) => VideoCapture::new(device, videoio::CAP_ANY),
        Err(_) => VideoCapture::from_file(input, videoio::CAP_ANY),
    }
    .map_err(cv_error)?;
    if !cap.is_opened().map_err(cv_error)? {
        return Err(MotionError::source_failed(format!("cannot open {input}")));
    }
    Ok(cap)
}

pub struct OpenCvSource {
    fps: f64,
    pending: VecDeque<String>,
    current: Option<(String, VideoCapture)>,
}

impl OpenCvSource {
    /// Opens the first input right away to learn the frame rate, unless one is given.
    pub fn open(inputs: Vec<String>, fps: Option<f64>) -> MotionResult<Self> {
        let mut pending: VecDeque<String> = inputs.into();
        let first = pending
            .pop_front()
            .ok_or_else(|| MotionError::source_failed("no capture inputs given"))?;
        let cap = open_capture(&first)?;
        let fps = match fps {
            Some(fps) => fps,
            None => cap.get(videoio::CAP_PROP_FPS).map_err(cv_error)?,
        };
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MotionError::InvalidFrameRate(fps));
        }
        // Re-queued so `next_clip` announces it like every other input.
        pending.push_front(first);
        Ok(Self {
            fps,
            pending,
            current: None,
        })
    }

    fn read_frame(cap: &mut VideoCapture) -> MotionResult<Option<image::RgbImage>> {
        let mut frame = Mat::default();
        if !cap.read(&mut frame).map_err(cv_error)? || frame.empty() {
            return Ok(None);
        }
        let mut rgb = Mat::default();
        imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(cv_error)?;
        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        let bytes = rgb.data_bytes().map_err(cv_error)?.to_vec();
        image::RgbImage::from_raw(width, height, bytes)
            .map(Some)
            .ok_or_else(|| MotionError::source_failed("captured frame has an unexpected layout"))
    }
}

impl FrameSource for OpenCvSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_clip(&mut self) -> Option<String> {
        self.current = None;
        while let Some(input) = self.pending.pop_front() {
            match open_capture(&input) {
                Ok(cap) => {
                    debug!(input = %input, "capture opened");
                    self.current = Some((input.clone(), cap));
                    return Some(input);
                }
                Err(error) => warn!(input = %input, %error, "skipping input"),
            }
        }
        None
    }

    fn next_item(&mut self) -> Option<MotionResult<SourceItem>> {
        loop {
            if let Some((clip, cap)) = self.current.as_mut() {
                match Self::read_frame(cap) {
                    Ok(Some(image)) => {
                        return Some(Ok(SourceItem {
                            clip: clip.clone(),
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
