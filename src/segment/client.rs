use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::config::ModelSettings;
use crate::error::PipelineError;
use crate::segment::backend::SegmentationBackend;
use crate::segment::backends::RegionGrowBackend;
#[cfg(feature = "backend-tract")]
use crate::segment::checkpoint::ensure_checkpoint;
use crate::segment::result::{SeedPoint, SegmentationResult};

pub const KNOWN_BACKENDS: &[&str] = &["tract", "region-grow"];

/// Outcome of model initialization, checked before any request is dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelReadiness {
    Ready { backend: &'static str },
    Unavailable { reason: String },
}

impl ModelReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelReadiness::Ready { .. })
    }
}

type SharedBackend = Arc<Mutex<Box<dyn SegmentationBackend>>>;

/// Handle to the loaded segmentation capability.
///
/// Cloning shares the same backend. All `segment` calls are serialized on one
/// lock, so at most one inference runs at a time.
#[derive(Clone)]
pub struct SegmentationClient {
    backend: Option<SharedBackend>,
    readiness: ModelReadiness,
}

impl SegmentationClient {
    /// Wrap an already constructed backend.
    pub fn ready<B: SegmentationBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            backend: None,
            readiness: ModelReadiness::Unavailable {
                reason: reason.into(),
            },
        }
    }

    fn from_boxed(backend: Box<dyn SegmentationBackend>) -> Self {
        let name = backend.name();
        Self {
            backend: Some(Arc::new(Mutex::new(backend))),
            readiness: ModelReadiness::Ready { backend: name },
        }
    }

    /// Load the configured backend once at process start.
    ///
    /// Never fails: a load error yields a client whose readiness is
    /// `Unavailable`, and every later `segment` call reports `ModelUnavailable`.
    pub fn initialize(settings: &ModelSettings) -> Self {
        let loaded = load_backend(settings).and_then(|mut backend| {
            backend.warm_up()?;
            Ok(backend)
        });
        match loaded {
            Ok(backend) => {
                log::info!("segmentation backend '{}' loaded", backend.name());
                Self::from_boxed(backend)
            }
            Err(err) => {
                let reason = format!("{:#}", err);
                log::warn!("segmentation model unavailable: {}", reason);
                Self::unavailable(reason)
            }
        }
    }

    pub fn readiness(&self) -> &ModelReadiness {
        &self.readiness
    }

    /// Fail fast with `ModelUnavailable` when initialization did not succeed.
    pub fn ensure_ready(&self) -> Result<(), PipelineError> {
        match &self.readiness {
            ModelReadiness::Ready { .. } if self.backend.is_some() => Ok(()),
            ModelReadiness::Ready { backend } => Err(PipelineError::ModelUnavailable(format!(
                "backend '{}' has no loaded model",
                backend
            ))),
            ModelReadiness::Unavailable { reason } => {
                Err(PipelineError::ModelUnavailable(reason.clone()))
            }
        }
    }

    /// Segment `image` with a single foreground point at its midpoint.
    pub fn segment(&self, image: &RgbImage) -> Result<SegmentationResult, PipelineError> {
        self.ensure_ready()?;
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| PipelineError::ModelUnavailable("no backend loaded".to_string()))?;

        let (width, height) = image.dimensions();
        let seed = SeedPoint::center_of(width, height);

        let result = {
            let mut guard = backend
                .lock()
                .map_err(|_| PipelineError::Inference("backend lock poisoned".to_string()))?;
            guard.segment(image, seed).map_err(PipelineError::inference)?
        };

        if result.mask.width() != width || result.mask.height() != height {
            return Err(PipelineError::Inference(format!(
                "mask size {}x{} does not match image {}x{}",
                result.mask.width(),
                result.mask.height(),
                width,
                height
            )));
        }
        Ok(result)
    }
}

fn load_backend(settings: &ModelSettings) -> Result<Box<dyn SegmentationBackend>> {
    match settings.backend.as_str() {
        "region-grow" => Ok(Box::new(
            RegionGrowBackend::new().with_tolerance(settings.region_tolerance),
        )),
        "tract" => load_tract(settings),
        other => Err(anyhow!("unknown segmentation backend '{}'", other)),
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &ModelSettings) -> Result<Box<dyn SegmentationBackend>> {
    use crate::segment::backends::TractBackend;

    ensure_checkpoint(&settings.checkpoint_path, settings.checkpoint_url.as_deref())?;
    let backend = TractBackend::new(&settings.checkpoint_path, settings.input_size)?
        .with_threshold(settings.mask_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(settings: &ModelSettings) -> Result<Box<dyn SegmentationBackend>> {
    // Nothing is provisioned for a backend this build cannot run.
    Err(anyhow!(
        "tract backend requires the backend-tract feature (checkpoint {})",
        settings.checkpoint_path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::backends::StubBackend;

    fn settings(backend: &str, dir: &std::path::Path) -> ModelSettings {
        ModelSettings {
            backend: backend.to_string(),
            checkpoint_path: dir.join("missing.onnx"),
            checkpoint_url: None,
            ..ModelSettings::default()
        }
    }

    #[test]
    fn missing_checkpoint_leaves_client_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let client = SegmentationClient::initialize(&settings("tract", dir.path()));
        assert!(!client.readiness().is_ready());

        let err = client.segment(&RgbImage::new(4, 4)).unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
    }

    #[test]
    fn region_grow_needs_no_weights() {
        let dir = tempfile::tempdir().unwrap();
        let client = SegmentationClient::initialize(&settings("region-grow", dir.path()));
        assert_eq!(
            client.readiness(),
            &ModelReadiness::Ready {
                backend: "region-grow"
            }
        );
        let result = client.segment(&RgbImage::new(4, 4)).unwrap();
        assert_eq!(result.mask.covered_pixels(), 16);
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_without_feature_skips_checkpoint_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings("tract", dir.path());
        settings.checkpoint_url = Some("http://127.0.0.1:9/sam.onnx".to_string());
        let client = SegmentationClient::initialize(&settings);
        match client.readiness() {
            ModelReadiness::Unavailable { reason } => assert!(reason.contains("backend-tract")),
            other => panic!("unexpected readiness {:?}", other),
        }
        assert!(!settings.checkpoint_path.exists());
    }

    #[test]
    fn unknown_backend_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let client = SegmentationClient::initialize(&settings("yolo", dir.path()));
        match client.readiness() {
            ModelReadiness::Unavailable { reason } => assert!(reason.contains("yolo")),
            other => panic!("unexpected readiness {:?}", other),
        }
    }

    #[test]
    fn backend_failure_maps_to_inference_error() {
        let client = SegmentationClient::ready(StubBackend::failing("out of memory"));
        let err = client.segment(&RgbImage::new(4, 4)).unwrap_err();
        assert_eq!(err, PipelineError::Inference("out of memory".to_string()));
    }

    #[test]
    fn concurrent_calls_share_one_backend() {
        let client = SegmentationClient::ready(StubBackend::covering(5, 0.7));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                std::thread::spawn(move || client.segment(&RgbImage::new(6, 6)))
            })
            .collect();
        for handle in handles {
            let result = handle.join().unwrap().unwrap();
            assert_eq!(result.mask.covered_pixels(), 5);
        }
    }
}
