use anyhow::Result;
use image::RgbImage;

use crate::segment::result::{SeedPoint, SegmentationResult};

/// Point-prompted segmentation backend.
///
/// `segment` takes `&mut self`: a loaded model is a single shared instance
/// and the client serializes every call behind a lock. Backends that are
/// reentrant still go through that lock.
pub trait SegmentationBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Segment the region around `seed` (foreground label).
    ///
    /// The returned mask must have the same width and height as `image`.
    fn segment(&mut self, image: &RgbImage, seed: SeedPoint) -> Result<SegmentationResult>;

    /// Optional warm-up hook, run once during initialization.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
