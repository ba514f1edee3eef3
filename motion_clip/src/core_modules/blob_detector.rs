// THEORY:
// The `BlobDetector` is the spatial grouping step of the recorder. It takes the
// cleaned, binary foreground mask of a single frame and groups foreground pixels
// into connected regions, or "blobs."
//
// Key architectural principles:
// 1.  **Region Growing**: Every unvisited foreground pixel seeds a new blob. The
//     blob grows by repeatedly visiting the 8 neighbors of the pixels already in
//     it, until no foreground neighbor remains.
// 2.  **Data Aggregation**: Once a blob is fully grown, its area (pixel count)
//     and bounding box are packaged into a `Blob`.
// 3.  **Stateless Utility**: `find_blobs` has no memory of previous frames. All
//     temporal reasoning lives in the background model and the episode state
//     machine.

use image::GrayImage;

/// A simple struct to represent a 2D point on the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// A connected region of foreground pixels in one mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Number of foreground pixels in the region.
    pub area: u32,
    /// Top-left and bottom-right corners, inclusive.
    pub bounding_box: (Point, Point),
}

pub mod blob_detector {
    use super::*;

    /// Finds every 8-connected region of non-zero pixels in `mask`.
    pub fn find_blobs(mask: &GrayImage) -> Vec<Blob> {
        let (width, height) = mask.dimensions();
        let mut visited = vec![false; (width * height) as usize];
        let mut blobs = Vec::new();

        for y in 0..height {
            for x in 0..width {
                let index = (y * width + x) as usize;
                if visited[index] || mask.get_pixel(x, y).0[0] == 0 {
                    continue;
                }
                blobs.push(grow_blob(mask, Point { x, y }, &mut visited));
            }
        }

        blobs
    }

    /// True if any blob in `mask` has an area strictly greater than `min_area`.
    /// Stops at the first qualifying blob.
    pub fn has_blob_larger_than(mask: &GrayImage, min_area: u32) -> bool {
        let (width, height) = mask.dimensions();
        let mut visited = vec![false; (width * height) as usize];

        for y in 0..height {
            for x in 0..width {
                let index = (y * width + x) as usize;
                if visited[index] || mask.get_pixel(x, y).0[0] == 0 {
                    continue;
                }
                if grow_blob(mask, Point { x, y }, &mut visited).area > min_area {
                    return true;
                }
            }
        }

        false
    }

    /// Depth-first flood fill from `seed` over 8-connected foreground pixels.
    fn grow_blob(mask: &GrayImage, seed: Point, visited: &mut [bool]) -> Blob {
        let (width, height) = mask.dimensions();
        let mut stack = vec![seed];
        visited[(seed.y * width + seed.x) as usize] = true;

        let mut area = 0u32;
        let mut min = seed;
        let mut max = seed;

        while let Some(current) = stack.pop() {
            area += 1;
            min.x = min.x.min(current.x);
            min.y = min.y.min(current.y);
            max.x = max.x.max(current.x);
            max.y = max.y.max(current.y);

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = current.x as i64 + dx;
                    let ny = current.y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let (nx, ny) = (nx as u32, ny as u32);
                    let index = (ny * width + nx) as usize;
                    if !visited[index] && mask.get_pixel(nx, ny).0[0] != 0 {
                        visited[index] = true;
                        stack.push(Point { x: nx, y: ny });
                    }
                }
            }
        }

        Blob {
            area,
            bounding_box: (min, max),
        }
    }
}
