//! detect_image - run the detection pipeline on one local image

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use pothole_witness::{
    AreaEstimator, ArtifactStore, DetectionPipeline, DetectionRequest, EventBroadcaster, GeoPoint,
    ModelSettings, PipelineError, SegmentationClient, SqliteDetectionStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyse.
    image: PathBuf,
    /// Latitude of the capture location.
    #[arg(long, allow_hyphen_values = true)]
    latitude: Option<f64>,
    /// Longitude of the capture location.
    #[arg(long, allow_hyphen_values = true)]
    longitude: Option<f64>,
    /// Path to the detection database.
    #[arg(long, env = "POTHOLE_DB_PATH", default_value = "potholes.db")]
    db_path: String,
    /// Directory receiving overlay images.
    #[arg(long, env = "POTHOLE_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,
    /// Segmentation backend (tract|region-grow).
    #[arg(long, env = "POTHOLE_BACKEND", default_value = "region-grow")]
    backend: String,
    /// ONNX checkpoint for the tract backend.
    #[arg(long, env = "SAM_CHECKPOINT_PATH")]
    checkpoint: Option<PathBuf>,
    /// Calibration constant.
    #[arg(long, env = "POTHOLE_PIXELS_PER_METER", default_value_t = 100.0)]
    pixels_per_meter: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !args.pixels_per_meter.is_finite() || args.pixels_per_meter <= 0.0 {
        return Err(anyhow!("--pixels-per-meter must be a positive number"));
    }
    let location = GeoPoint::from_parts(args.latitude, args.longitude)?;
    let image = std::fs::read(&args.image)
        .with_context(|| format!("read image {}", args.image.display()))?;

    let mut model = ModelSettings {
        backend: args.backend.clone(),
        ..ModelSettings::default()
    };
    if let Some(checkpoint) = args.checkpoint.clone() {
        model.checkpoint_path = checkpoint;
    }

    let pipeline = DetectionPipeline::new(
        SegmentationClient::initialize(&model),
        AreaEstimator::new(args.pixels_per_meter),
        ArtifactStore::open(&args.upload_dir)?,
        Arc::new(SqliteDetectionStore::open(&args.db_path)?),
        EventBroadcaster::default(),
    );

    match pipeline.run(DetectionRequest::new(image, location)) {
        Ok(outcome) => {
            let report = serde_json::json!({
                "success": true,
                "record": outcome.record,
                "image_path": outcome.artifact.path,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(PipelineError::NoDetection) => {
            println!("{}", serde_json::json!({ "success": false, "message": "no pothole detected" }));
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
