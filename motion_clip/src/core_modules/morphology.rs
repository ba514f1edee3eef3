// THEORY:
// Raw foreground masks are speckled: sensor noise, ripples, and compression
// artifacts light up isolated pixels that are not motion. Morphological
// "opening" (an erosion followed by a dilation with the same structuring
// element) removes anything smaller than the element while leaving larger
// shapes roughly intact. A final binarization discards the faint, partially
// confident pixels the background model may emit.

use image::{GrayImage, Luma};

/// A binary structuring element stored as the offsets of its set cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    offsets: Vec<(i32, i32)>,
}

impl StructuringElement {
    /// An elliptical element inscribed in a `size` x `size` box.
    pub fn ellipse(size: u32) -> Self {
        let size = size.max(1) as i32;
        let r = size / 2;
        let c = size / 2;
        let mut offsets = Vec::new();

        if r == 0 {
            offsets.push((0, 0));
            return Self { offsets };
        }

        let inv_r2 = 1.0 / (r * r) as f64;
        for row in 0..size {
            let dy = row - r;
            if dy.abs() > r {
                continue;
            }
            let dx = (c as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i32;
            let start = (c - dx).max(0);
            let end = (c + dx + 1).min(size);
            for col in start..end {
                offsets.push((col - c, dy));
            }
        }
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Erosion followed by dilation, repeated `iterations` times.
pub fn open(mask: &GrayImage, element: &StructuringElement, iterations: u32) -> GrayImage {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = dilate(&erode(&out, element), element);
    }
    out
}

/// Minimum over the element. Out-of-bounds cells are ignored.
pub fn erode(mask: &GrayImage, element: &StructuringElement) -> GrayImage {
    apply_element(mask, element, u8::MAX, u8::min)
}

/// Maximum over the element. Out-of-bounds cells are ignored.
pub fn dilate(mask: &GrayImage, element: &StructuringElement) -> GrayImage {
    apply_element(mask, element, u8::MIN, u8::max)
}

/// Sets pixels strictly above `threshold` to 255 and everything else to 0.
pub fn binarize(mask: &mut GrayImage, threshold: u8) {
    for pixel in mask.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > threshold { 255 } else { 0 };
    }
}

fn apply_element(
    mask: &GrayImage,
    element: &StructuringElement,
    identity: u8,
    combine: fn(u8, u8) -> u8,
) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut out = GrayImage::new(width, height);

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let mut acc = identity;
            for &(dx, dy) in &element.offsets {
                let nx = x + dx;
                let ny = y + dy;
                if nx >= 0 && nx < width as i32 && ny >= 0 && ny < height as i32 {
                    acc = combine(acc, mask.get_pixel(nx as u32, ny as u32).0[0]);
                }
            }
            out.put_pixel(x as u32, y as u32, Luma([acc]));
        }
    }
    out
}
