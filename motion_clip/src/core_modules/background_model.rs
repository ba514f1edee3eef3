// THEORY:
// The background model is the temporal memory of the recorder. Like a grid of
// learning cells, every pixel location keeps its own statistics about what
// "normal" looks like and reports whether the newest observation deviates from
// it. The output is a foreground mask (255 = foreground, 0 = background) that the
// motion classifier cleans up and turns into a yes/no decision.
//
// Two models are provided, selectable through `Algorithm`:
// 1.  **GaussianBackground** (`MOG2`): a running mean and variance of luma per
//     pixel. A pixel is foreground when its squared distance from the mean
//     exceeds `var_threshold` times the learned variance. The learning rate
//     starts fast and settles at `1 / history`.
// 2.  **StabilityBackground** (`CNT`): counts how many consecutive frames a pixel
//     has stayed (nearly) unchanged. Once a value has been stable for
//     `min_stability` frames it becomes the background for that pixel; stability
//     saturates at `max_stability`, so a long-stable background is slow to be
//     replaced by a newly stopped object.
//
// Both models are stateful and order-dependent: frames must be applied in the
// order they were captured.

use crate::config::{Algorithm, MotionConfig};
use image::{GrayImage, Luma, RgbImage};

/// A stateful foreground-mask generator.
pub trait ForegroundMasker: Send {
    /// Updates the model with `frame` and returns its foreground mask.
    fn apply(&mut self, frame: &RgbImage) -> GrayImage;
}

/// Builds the masker selected by `config.algorithm` for a stream at `fps`.
pub fn masker_for(config: &MotionConfig, fps: f64) -> Box<dyn ForegroundMasker> {
    match config.algorithm {
        Algorithm::Mog2 => Box::new(GaussianBackground::new(config.bgsub_threshold)),
        Algorithm::Cnt => {
            let min_stability = fps.round().max(1.0) as u32;
            let max_stability = (fps * 60.0).round().max(1.0) as u32;
            Box::new(StabilityBackground::new(min_stability, max_stability))
        }
    }
}

const FOREGROUND: Luma<u8> = Luma([255]);
const BACKGROUND: Luma<u8> = Luma([0]);

const DEFAULT_HISTORY: u32 = 500;
const INITIAL_VARIANCE: f32 = 15.0;
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 75.0;

/// Running single-Gaussian background model on luma.
pub struct GaussianBackground {
    var_threshold: f32,
    history: u32,
    frames_seen: u32,
    dimensions: (u32, u32),
    mean: Vec<f32>,
    variance: Vec<f32>,
}

impl GaussianBackground {
    pub fn new(var_threshold: f64) -> Self {
        Self::with_history(var_threshold, DEFAULT_HISTORY)
    }

    pub fn with_history(var_threshold: f64, history: u32) -> Self {
        Self {
            var_threshold: var_threshold as f32,
            history: history.max(1),
            frames_seen: 0,
            dimensions: (0, 0),
            mean: Vec::new(),
            variance: Vec::new(),
        }
    }

    fn reset(&mut self, luma: &GrayImage) {
        self.dimensions = luma.dimensions();
        self.mean = luma.pixels().map(|p| p.0[0] as f32).collect();
        self.variance = vec![INITIAL_VARIANCE; self.mean.len()];
        self.frames_seen = 1;
    }
}

impl ForegroundMasker for GaussianBackground {
    fn apply(&mut self, frame: &RgbImage) -> GrayImage {
        let luma = image::imageops::grayscale(frame);
        let (width, height) = luma.dimensions();

        if self.frames_seen == 0 || self.dimensions != (width, height) {
            self.reset(&luma);
            return GrayImage::from_pixel(width, height, BACKGROUND);
        }

        self.frames_seen = self.frames_seen.saturating_add(1);
        let alpha = 1.0 / self.frames_seen.min(self.history) as f32;

        let mut mask = GrayImage::new(width, height);
        for (i, (pixel, out)) in luma.pixels().zip(mask.pixels_mut()).enumerate() {
            let value = pixel.0[0] as f32;
            let diff = value - self.mean[i];
            let dist2 = diff * diff;

            *out = if dist2 > self.var_threshold * self.variance[i] {
                FOREGROUND
            } else {
                BACKGROUND
            };

            self.mean[i] += alpha * diff;
            let variance = self.variance[i] + alpha * (dist2 - self.variance[i]);
            self.variance[i] = variance.clamp(MIN_VARIANCE, MAX_VARIANCE);
        }
        mask
    }
}

const STABILITY_TOLERANCE: i16 = 8;
const FOREGROUND_TOLERANCE: i16 = 20;

/// Pixel-stability counting background model on luma.
pub struct StabilityBackground {
    min_stability: u32,
    max_stability: u32,
    dimensions: (u32, u32),
    candidate: Vec<u8>,
    stability: Vec<u32>,
    background: Vec<Option<u8>>,
}

impl StabilityBackground {
    pub fn new(min_stability: u32, max_stability: u32) -> Self {
        let min_stability = min_stability.max(1);
        Self {
            min_stability,
            max_stability: max_stability.max(min_stability),
            dimensions: (0, 0),
            candidate: Vec::new(),
            stability: Vec::new(),
            background: Vec::new(),
        }
    }
}

impl ForegroundMasker for StabilityBackground {
    fn apply(&mut self, frame: &RgbImage) -> GrayImage {
        let luma = image::imageops::grayscale(frame);
        let (width, height) = luma.dimensions();

        if self.dimensions != (width, height) {
            self.dimensions = (width, height);
            self.candidate = luma.as_raw().clone();
            self.stability = vec![0; self.candidate.len()];
            self.background = vec![None; self.candidate.len()];
            return GrayImage::from_pixel(width, height, BACKGROUND);
        }

        let mut mask = GrayImage::new(width, height);
        for (i, (pixel, out)) in luma.pixels().zip(mask.pixels_mut()).enumerate() {
            let value = pixel.0[0];

            if (value as i16 - self.candidate[i] as i16).abs() <= STABILITY_TOLERANCE {
                self.stability[i] = (self.stability[i] + 1).min(self.max_stability);
            } else if self.stability[i] > self.min_stability {
                // Long-stable pixels lose stability gradually instead of resetting.
                self.stability[i] -= self.min_stability;
            } else {
                self.candidate[i] = value;
                self.stability[i] = 0;
            }

            if self.stability[i] >= self.min_stability {
                self.background[i] = Some(self.candidate[i]);
            }

            let is_foreground = match self.background[i] {
                Some(bg) => (value as i16 - bg as i16).abs() > FOREGROUND_TOLERANCE,
                None => false,
            };
            *out = if is_foreground { FOREGROUND } else { BACKGROUND };
        }
        mask
    }
}
