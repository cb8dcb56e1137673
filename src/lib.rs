//! Pothole Witness
//!
//! Turns a street-scene image plus an optional geolocation into a persisted,
//! broadcast pothole observation.
//!
//! # Pipeline
//!
//! image -> segmentation mask -> area estimate -> severity tier ->
//! overlay artifact -> detection record -> live event
//!
//! # Module Structure
//!
//! - `segment`: segmentation capability (backends, readiness, serialized access)
//! - `measure`: area estimation, depth guess, severity classification
//! - `overlay`: mask highlighting and the overlay artifact directory
//! - `storage`: detection record store (SQLite, in-memory)
//! - `broadcast`: publish/subscribe hub for new detections
//! - `report`: per-detection PDF report
//! - `pipeline`: the orchestrator tying the above together
//! - `api`: HTTP transport with a Server-Sent Events stream
//! - `config`: file + environment configuration

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};

pub mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod measure;
pub mod overlay;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod segment;
pub mod storage;

pub use broadcast::{DetectionEvent, EventBroadcaster, Subscription};
pub use config::{ModelSettings, PotholeConfig};
pub use error::PipelineError;
pub use measure::{AreaEstimator, ImageShape, Severity, SeverityClassifier};
pub use overlay::{ArtifactRef, ArtifactStore, OverlayRenderer};
pub use pipeline::{DetectionOutcome, DetectionPipeline, PipelineStage};
pub use record::{DetectionRecord, DetectionRequest, DetectionStatus, GeoPoint, NewDetection};
pub use segment::{
    Mask, ModelReadiness, RegionGrowBackend, SeedPoint, SegmentationBackend, SegmentationClient,
    SegmentationResult, StubBackend,
};
pub use storage::{DetectionStore, InMemoryDetectionStore, SqliteDetectionStore};

/// URI of a fresh shared-cache in-memory SQLite database.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:pothole_witness_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub(crate) fn now_ms() -> Result<i64> {
    Ok(chrono::Utc::now().timestamp_millis())
}
