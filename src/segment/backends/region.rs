use std::collections::VecDeque;

use anyhow::Result;
use image::RgbImage;

use crate::segment::backend::SegmentationBackend;
use crate::segment::result::{Mask, SeedPoint, SegmentationResult};

pub const DEFAULT_COLOR_TOLERANCE: u8 = 24;

/// CPU region-growing backend.
///
/// Floods outward (4-connected) from the seed over pixels whose largest
/// per-channel difference to the seed colour is within the tolerance. Needs
/// no model weights.
#[derive(Clone, Debug)]
pub struct RegionGrowBackend {
    tolerance: u8,
}

impl RegionGrowBackend {
    pub fn new() -> Self {
        Self {
            tolerance: DEFAULT_COLOR_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: u8) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl Default for RegionGrowBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn channel_distance(a: &image::Rgb<u8>, b: &image::Rgb<u8>) -> u8 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| x.abs_diff(*y))
        .max()
        .unwrap_or(0)
}

impl SegmentationBackend for RegionGrowBackend {
    fn name(&self) -> &'static str {
        "region-grow"
    }

    fn segment(&mut self, image: &RgbImage, seed: SeedPoint) -> Result<SegmentationResult> {
        let (width, height) = image.dimensions();
        let mut mask = Mask::empty(width, height);
        if seed.x >= width || seed.y >= height {
            return Ok(SegmentationResult::new(mask, 0.0));
        }

        let seed_color = *image.get_pixel(seed.x, seed.y);
        let headroom = f64::from(self.tolerance) + 1.0;
        let mut score_sum = 0.0;
        let mut covered = 0u64;

        let mut queue = VecDeque::new();
        mask.set(seed.x, seed.y, true);
        queue.push_back((seed.x, seed.y));

        while let Some((x, y)) = queue.pop_front() {
            let distance = channel_distance(&seed_color, image.get_pixel(x, y));
            score_sum += 1.0 - f64::from(distance) / headroom;
            covered += 1;

            let neighbours = [
                (x.checked_sub(1), Some(y)),
                (x.checked_add(1).filter(|nx| *nx < width), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), y.checked_add(1).filter(|ny| *ny < height)),
            ];
            for (nx, ny) in neighbours {
                let (Some(nx), Some(ny)) = (nx, ny) else {
                    continue;
                };
                if mask.get(nx, ny) {
                    continue;
                }
                if channel_distance(&seed_color, image.get_pixel(nx, ny)) <= self.tolerance {
                    mask.set(nx, ny, true);
                    queue.push_back((nx, ny));
                }
            }
        }

        let confidence = if covered == 0 {
            0.0
        } else {
            (score_sum / covered as f64) as f32
        };
        Ok(SegmentationResult::new(mask, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn road_with_hole() -> RgbImage {
        // 20x20 light grey road with a dark 6x5 patch around the centre.
        let mut img = RgbImage::from_pixel(20, 20, Rgb([180, 180, 180]));
        for y in 8..13 {
            for x in 7..13 {
                img.put_pixel(x, y, Rgb([40, 38, 35]));
            }
        }
        img
    }

    #[test]
    fn grows_over_dark_patch_only() {
        let img = road_with_hole();
        let mut backend = RegionGrowBackend::new();
        let result = backend
            .segment(&img, SeedPoint::center_of(20, 20))
            .unwrap();
        assert_eq!(result.mask.covered_pixels(), 30);
        assert!(result.mask.get(7, 8));
        assert!(!result.mask.get(6, 8));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn uniform_image_is_fully_covered() {
        let img = RgbImage::from_pixel(8, 6, Rgb([90, 90, 90]));
        let mut backend = RegionGrowBackend::new();
        let result = backend.segment(&img, SeedPoint::center_of(8, 6)).unwrap();
        assert_eq!(result.mask.covered_pixels(), 48);
    }

    #[test]
    fn zero_sized_image_yields_empty_mask() {
        let img = RgbImage::new(0, 0);
        let mut backend = RegionGrowBackend::new();
        let result = backend.segment(&img, SeedPoint::center_of(0, 0)).unwrap();
        assert!(result.mask.is_empty());
    }
}
