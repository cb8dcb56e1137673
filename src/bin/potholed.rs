//! potholed - Pothole Witness service daemon
//!
//! This daemon:
//! 1. Loads configuration (POTHOLE_CONFIG file + environment)
//! 2. Opens the detection database and the overlay directory
//! 3. Initializes the segmentation model once and records its readiness
//! 4. Serves the detection API and the live event stream until Ctrl-C

use anyhow::Result;
use std::sync::{mpsc, Arc};

use pothole_witness::{
    api::{ApiConfig, ApiServer},
    AreaEstimator, ArtifactStore, DetectionPipeline, EventBroadcaster, PotholeConfig,
    SegmentationClient, SqliteDetectionStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PotholeConfig::load()?;
    let store = SqliteDetectionStore::open(&config.db_path)?;
    log::info!("detection database ready at {}", config.db_path);
    let artifacts = ArtifactStore::open(&config.upload_dir)?;

    let segmenter = SegmentationClient::initialize(&config.model);
    if !segmenter.readiness().is_ready() {
        log::warn!("serving without a segmentation model; /detect will answer 503");
    }

    let pipeline = Arc::new(DetectionPipeline::new(
        segmenter,
        AreaEstimator::new(config.pixels_per_meter),
        artifacts,
        Arc::new(store),
        EventBroadcaster::new(config.subscriber_buffer),
    ));

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_upload_bytes: config.max_upload_bytes,
    };
    let api_handle = ApiServer::new(api_config, pipeline).spawn()?;
    log::info!("detection api listening on {}", api_handle.addr);
    log::info!(
        "potholed running. overlays in {}, calibration {} px/m",
        config.upload_dir.display(),
        config.pixels_per_meter
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("potholed waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
