// THEORY:
// A `Frame` is the unit that flows through every stage of the recorder. It is a
// "dumb" data container: an RGB raster plus the ordinal position the ingestion
// loop assigned to it. Once a frame has been appended to the pre-roll buffer it
// is never mutated again, so the raster sits behind an `Arc` and the buffer and
// a clip writer can hold the same frame without copying pixel data.

use image::RgbImage;
use std::sync::Arc;

/// A single ingested frame and its position in the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The frame index assigned by the ingestion loop.
    pub index: u64,
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            image: Arc::new(image),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// `(width, height)` in pixels.
    pub fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Packed RGB24 bytes, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}
