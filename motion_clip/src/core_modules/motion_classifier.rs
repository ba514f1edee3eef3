// THEORY:
// The `MotionClassifier` collapses the whole vision stack into one boolean per
// frame: "is there motion worth recording?" It owns the background model and
// applies a fixed policy on top of its mask:
//
// 1.  **Warm-up**: for the first `fps` frames the background model is still
//     forming, so the classifier answers `false`. The frames are still fed to
//     the model so it can learn the scene.
// 2.  **Cleanup**: `morph_iterations` opening passes with an elliptical element
//     remove speckle noise, then the mask is binarized at `threshold_value`.
// 3.  **Decision**: motion is present if any connected blob is larger than
//     `min_contour_area` pixels.

use crate::config::MotionConfig;
use crate::core_modules::background_model::ForegroundMasker;
use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::morphology::{self, StructuringElement};
use image::RgbImage;

pub struct MotionClassifier {
    masker: Box<dyn ForegroundMasker>,
    element: StructuringElement,
    morph_iterations: u32,
    threshold_value: u8,
    min_contour_area: u32,
    warm_up_remaining: u64,
}

impl MotionClassifier {
    pub fn new(config: &MotionConfig, masker: Box<dyn ForegroundMasker>, warm_up_frames: u64) -> Self {
        Self {
            masker,
            element: StructuringElement::ellipse(config.kernel_size),
            morph_iterations: config.morph_iterations,
            threshold_value: config.threshold_value,
            min_contour_area: config.min_contour_area,
            warm_up_remaining: warm_up_frames,
        }
    }

    /// Frames still to be seen before classification starts.
    pub fn warm_up_remaining(&self) -> u64 {
        self.warm_up_remaining
    }

    /// Classifies the next frame of the stream. Must be called in capture order.
    pub fn has_motion(&mut self, frame: &RgbImage) -> bool {
        let mask = self.masker.apply(frame);

        if self.warm_up_remaining > 0 {
            self.warm_up_remaining -= 1;
            return false;
        }

        let mut mask = morphology::open(&mask, &self.element, self.morph_iterations);
        morphology::binarize(&mut mask, self.threshold_value);
        blob_detector::has_blob_larger_than(&mask, self.min_contour_area)
    }
}
