use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::segment::backend::SegmentationBackend;
use crate::segment::result::{Mask, SeedPoint, SegmentationResult};

#[derive(Clone, Debug)]
enum StubBehavior {
    Cover { pixels: u64, confidence: f32 },
    Fail(String),
}

/// Stub backend for testing. Produces a scripted mask or a scripted failure.
///
/// Covered pixels are filled row-major from the top-left corner, so the
/// covered count is exact regardless of where the seed lands.
#[derive(Clone, Debug)]
pub struct StubBackend {
    behavior: StubBehavior,
}

impl StubBackend {
    pub fn covering(pixels: u64, confidence: f32) -> Self {
        Self {
            behavior: StubBehavior::Cover { pixels, confidence },
        }
    }

    pub fn empty() -> Self {
        Self::covering(0, 0.0)
    }

    pub fn failing(message: &str) -> Self {
        Self {
            behavior: StubBehavior::Fail(message.to_string()),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl SegmentationBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn segment(&mut self, image: &RgbImage, _seed: SeedPoint) -> Result<SegmentationResult> {
        match &self.behavior {
            StubBehavior::Fail(message) => Err(anyhow!("{}", message)),
            StubBehavior::Cover { pixels, confidence } => {
                let (width, height) = image.dimensions();
                let total = width as usize * height as usize;
                let covered = (*pixels).min(total as u64) as usize;
                let mut bits = vec![false; total];
                bits[..covered].fill(true);
                Ok(SegmentationResult::new(
                    Mask::from_bits(width, height, bits)?,
                    *confidence,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_covers_requested_pixels() {
        let image = RgbImage::new(10, 10);
        let mut backend = StubBackend::covering(42, 0.9);
        let result = backend
            .segment(&image, SeedPoint::center_of(10, 10))
            .unwrap();
        assert_eq!(result.mask.covered_pixels(), 42);
        assert_eq!(result.mask.width(), 10);
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn stub_caps_at_image_size() {
        let image = RgbImage::new(3, 3);
        let mut backend = StubBackend::covering(1_000, 0.5);
        let result = backend.segment(&image, SeedPoint::center_of(3, 3)).unwrap();
        assert_eq!(result.mask.covered_pixels(), 9);
    }

    #[test]
    fn stub_failure_is_reported() {
        let image = RgbImage::new(3, 3);
        let mut backend = StubBackend::failing("decoder exploded");
        let err = backend
            .segment(&image, SeedPoint::center_of(3, 3))
            .unwrap_err();
        assert_eq!(err.to_string(), "decoder exploded");
    }
}
