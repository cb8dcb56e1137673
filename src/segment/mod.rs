//! Segmentation capability.
//!
//! Backends turn an RGB image plus one seed point into a binary mask and a
//! confidence score. [`SegmentationClient`] owns the loaded backend, reports
//! its readiness, and serializes access to it.

mod backend;
pub mod backends;
pub mod checkpoint;
mod client;
mod result;

pub use backend::SegmentationBackend;
pub use backends::{RegionGrowBackend, StubBackend};
pub use client::{ModelReadiness, SegmentationClient, KNOWN_BACKENDS};
pub use result::{Mask, SeedPoint, SegmentationResult};
