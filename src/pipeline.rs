//! Detection-to-event pipeline.
//!
//! One call to [`DetectionPipeline::run`] takes an image through
//! segmentation, measurement, classification, overlay rendering, persistence
//! and fan-out. Every step up to record creation runs in order on the caller's
//! thread; a failure before creation leaves nothing in the store.

use std::sync::Arc;

use image::RgbImage;

use crate::broadcast::{DetectionEvent, EventBroadcaster};
use crate::error::PipelineError;
use crate::measure::{estimate_depth, AreaEstimator, ImageShape, SeverityClassifier};
use crate::overlay::{ArtifactRef, ArtifactStore, OverlayRenderer};
use crate::record::{DetectionRecord, DetectionRequest, NewDetection};
use crate::segment::{ModelReadiness, SegmentationClient};
use crate::storage::DetectionStore;

/// States a run passes through. `MaskEmpty` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    ReceivingInput,
    SegmentationPending,
    MaskEmpty,
    MaskFound,
    MeasurementComputed,
    Persisted,
    Broadcast,
    Complete,
}

/// Successful run: the created record and the stored overlay.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    pub record: DetectionRecord,
    pub artifact: ArtifactRef,
    /// Live subscribers that accepted the event.
    pub subscribers_notified: usize,
}

pub struct DetectionPipeline {
    segmenter: SegmentationClient,
    estimator: AreaEstimator,
    artifacts: ArtifactStore,
    store: Arc<dyn DetectionStore>,
    broadcaster: EventBroadcaster,
}

impl DetectionPipeline {
    pub fn new(
        segmenter: SegmentationClient,
        estimator: AreaEstimator,
        artifacts: ArtifactStore,
        store: Arc<dyn DetectionStore>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            segmenter,
            estimator,
            artifacts,
            store,
            broadcaster,
        }
    }

    pub fn readiness(&self) -> &ModelReadiness {
        self.segmenter.readiness()
    }

    pub fn store(&self) -> &Arc<dyn DetectionStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn run(&self, request: DetectionRequest) -> Result<DetectionOutcome, PipelineError> {
        self.run_traced(request).0
    }

    /// Like [`run`](Self::run), also returning every stage entered in order.
    pub fn run_traced(
        &self,
        request: DetectionRequest,
    ) -> (Result<DetectionOutcome, PipelineError>, Vec<PipelineStage>) {
        let mut trail = vec![PipelineStage::ReceivingInput];
        let result = self.run_stages(request, &mut trail);
        let last = trail.last().copied().unwrap_or(PipelineStage::ReceivingInput);
        match &result {
            Ok(_) => {}
            Err(PipelineError::NoDetection) => log::info!("no pothole detected ({:?})", last),
            Err(err) => log::warn!("detection failed during {:?}: {}", last, err),
        }
        (result, trail)
    }

    fn run_stages(
        &self,
        request: DetectionRequest,
        trail: &mut Vec<PipelineStage>,
    ) -> Result<DetectionOutcome, PipelineError> {
        if request.image.is_empty() {
            return Err(PipelineError::InvalidInput("no image uploaded".to_string()));
        }
        self.segmenter.ensure_ready()?;
        let image = decode_rgb(&request.image)?;

        trail.push(PipelineStage::SegmentationPending);
        let segmentation = self.segmenter.segment(&image)?;
        if segmentation.mask.is_empty() {
            trail.push(PipelineStage::MaskEmpty);
            return Err(PipelineError::NoDetection);
        }
        trail.push(PipelineStage::MaskFound);

        let (width, height) = image.dimensions();
        let area_m2 = self
            .estimator
            .estimate_area(segmentation.mask.covered_pixels(), ImageShape::new(width, height));
        let severity = SeverityClassifier::classify(area_m2);
        let depth_meters = estimate_depth(area_m2);
        trail.push(PipelineStage::MeasurementComputed);
        log::debug!(
            "mask covers {} px -> {:.4} m2 ({})",
            segmentation.mask.covered_pixels(),
            area_m2,
            severity
        );

        let overlay = OverlayRenderer::render(&image, &segmentation.mask);
        let artifact = self
            .artifacts
            .save(&overlay)
            .map_err(PipelineError::artifact)?;

        let created = self.store.create(NewDetection {
            location: request.location,
            severity,
            area_m2,
            depth_meters,
            image_path: artifact.path.to_string_lossy().into_owned(),
            confidence: segmentation.confidence,
        });
        let record = match created {
            Ok(record) => record,
            Err(err) => {
                if let Err(cleanup) = std::fs::remove_file(&artifact.path) {
                    log::warn!(
                        "failed to remove orphaned overlay {}: {}",
                        artifact.path.display(),
                        cleanup
                    );
                }
                return Err(PipelineError::store(err));
            }
        };
        trail.push(PipelineStage::Persisted);

        let subscribers_notified = self.broadcaster.publish(&DetectionEvent::from(&record));
        trail.push(PipelineStage::Broadcast);

        log::info!(
            "pothole #{} recorded: severity={} area={:.3}m2 confidence={:.2} notified={}",
            record.id,
            record.severity,
            record.area,
            record.confidence,
            subscribers_notified
        );
        trail.push(PipelineStage::Complete);
        Ok(DetectionOutcome {
            record,
            artifact,
            subscribers_notified,
        })
    }
}

fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let decoded = image::load_from_memory(bytes).map_err(|err| {
        PipelineError::InvalidInput(format!("image is not a decodable raster: {}", err))
    })?;
    Ok(decoded.to_rgb8())
}
