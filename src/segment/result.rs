use anyhow::{anyhow, Result};

/// Single pixel location given to a backend as the location hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedPoint {
    pub x: u32,
    pub y: u32,
}

impl SeedPoint {
    /// Horizontal and vertical midpoint of a `width` x `height` image.
    pub fn center_of(width: u32, height: u32) -> Self {
        Self {
            x: width / 2,
            y: height / 2,
        }
    }
}

/// Binary per-pixel mask, row-major, same size as the segmented image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_bits(width: u32, height: u32, bits: Vec<bool>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("mask dimensions overflow"))?;
        if bits.len() != expected {
            return Err(anyhow!(
                "mask length mismatch: expected {}, got {}",
                expected,
                bits.len()
            ));
        }
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, covered: bool) {
        if x < self.width && y < self.height {
            self.bits[y as usize * self.width as usize + x as usize] = covered;
        }
    }

    pub fn covered_pixels(&self) -> u64 {
        self.bits.iter().filter(|b| **b).count() as u64
    }

    /// True for a zero-sized mask or one with no covered pixel.
    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }
}

/// Mask plus the backend's confidence for it.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentationResult {
    pub mask: Mask,
    /// Clamped to `0..=1`.
    pub confidence: f32,
}

impl SegmentationResult {
    pub fn new(mask: Mask, confidence: f32) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { mask, confidence }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_integer_midpoint() {
        assert_eq!(SeedPoint::center_of(640, 480), SeedPoint { x: 320, y: 240 });
        assert_eq!(SeedPoint::center_of(5, 3), SeedPoint { x: 2, y: 1 });
    }

    #[test]
    fn mask_counts_covered_pixels() -> Result<()> {
        let mask = Mask::from_bits(2, 2, vec![true, false, true, true])?;
        assert_eq!(mask.covered_pixels(), 3);
        assert!(!mask.is_empty());
        assert!(mask.get(0, 1));
        assert!(!mask.get(1, 0));
        assert!(!mask.get(5, 5));
        Ok(())
    }

    #[test]
    fn zero_sized_mask_is_empty() {
        assert!(Mask::empty(0, 0).is_empty());
        assert!(Mask::empty(4, 4).is_empty());
    }

    #[test]
    fn mask_rejects_wrong_length() {
        assert!(Mask::from_bits(3, 3, vec![false; 8]).is_err());
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(SegmentationResult::new(Mask::empty(1, 1), 1.7).confidence, 1.0);
        assert_eq!(SegmentationResult::new(Mask::empty(1, 1), -0.2).confidence, 0.0);
        assert_eq!(SegmentationResult::new(Mask::empty(1, 1), f32::NAN).confidence, 0.0);
    }
}
