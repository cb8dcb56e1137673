use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::measure::DEFAULT_PIXELS_PER_METER;
use crate::segment::backends::region::DEFAULT_COLOR_TOLERANCE;
use crate::segment::KNOWN_BACKENDS;

const DEFAULT_DB_PATH: &str = "potholes.db";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_CHECKPOINT_FILE: &str = "sam_vit_b_01ec64.onnx";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 1024;
const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Deserialize, Default)]
struct PotholeConfigFile {
    db_path: Option<String>,
    upload_dir: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    model: Option<ModelConfigFile>,
    calibration: Option<CalibrationConfigFile>,
    broadcast: Option<BroadcastConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    checkpoint_path: Option<PathBuf>,
    checkpoint_url: Option<String>,
    input_size: Option<u32>,
    mask_threshold: Option<f32>,
    region_tolerance: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    pixels_per_meter: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct BroadcastConfigFile {
    subscriber_buffer: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PotholeConfig {
    pub db_path: String,
    pub upload_dir: PathBuf,
    pub api_addr: String,
    pub max_upload_bytes: usize,
    pub model: ModelSettings,
    pub pixels_per_meter: f64,
    pub subscriber_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// One of `tract` or `region-grow`.
    pub backend: String,
    pub checkpoint_path: PathBuf,
    pub checkpoint_url: Option<String>,
    /// Square side length the model expects.
    pub input_size: u32,
    pub mask_threshold: f32,
    pub region_tolerance: u8,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            checkpoint_path: Path::new(DEFAULT_UPLOAD_DIR).join(DEFAULT_CHECKPOINT_FILE),
            checkpoint_url: None,
            input_size: DEFAULT_MODEL_INPUT_SIZE,
            mask_threshold: 0.0,
            region_tolerance: DEFAULT_COLOR_TOLERANCE,
        }
    }
}

impl PotholeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POTHOLE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let file_cfg = file_cfg.unwrap_or_default();
        let mut checkpoint = file_cfg
            .model
            .as_ref()
            .and_then(|model| model.checkpoint_path.clone());
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        if let Some(path) = non_empty_env("SAM_CHECKPOINT_PATH") {
            checkpoint = Some(PathBuf::from(path));
        }
        // Default checkpoint follows the final upload dir.
        cfg.model.checkpoint_path =
            checkpoint.unwrap_or_else(|| cfg.upload_dir.join(DEFAULT_CHECKPOINT_FILE));
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PotholeConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let upload_dir = file
            .upload_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR));
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let max_upload_bytes = file
            .api
            .as_ref()
            .and_then(|api| api.max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            backend: model_file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            checkpoint_path: model_file
                .checkpoint_path
                .unwrap_or_else(|| upload_dir.join(DEFAULT_CHECKPOINT_FILE)),
            checkpoint_url: model_file.checkpoint_url,
            input_size: model_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            mask_threshold: model_file.mask_threshold.unwrap_or(0.0),
            region_tolerance: model_file
                .region_tolerance
                .unwrap_or(DEFAULT_COLOR_TOLERANCE),
        };
        let pixels_per_meter = file
            .calibration
            .and_then(|calibration| calibration.pixels_per_meter)
            .unwrap_or(DEFAULT_PIXELS_PER_METER);
        let subscriber_buffer = file
            .broadcast
            .and_then(|broadcast| broadcast.subscriber_buffer)
            .unwrap_or(DEFAULT_SUBSCRIBER_BUFFER);
        Self {
            db_path,
            upload_dir,
            api_addr,
            max_upload_bytes,
            model,
            pixels_per_meter,
            subscriber_buffer,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("POTHOLE_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = non_empty_env("POTHOLE_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(addr) = non_empty_env("POTHOLE_API_ADDR") {
            self.api_addr = addr;
        } else if let Some(port) = non_empty_env("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow!("PORT must be a TCP port number"))?;
            self.api_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(backend) = non_empty_env("POTHOLE_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(url) = non_empty_env("SAM_CHECKPOINT_URL") {
            self.model.checkpoint_url = Some(url);
        }
        if let Some(ppm) = non_empty_env("POTHOLE_PIXELS_PER_METER") {
            self.pixels_per_meter = ppm
                .parse()
                .map_err(|_| anyhow!("POTHOLE_PIXELS_PER_METER must be a number"))?;
        }
        if let Some(limit) = non_empty_env("POTHOLE_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit
                .parse()
                .map_err(|_| anyhow!("POTHOLE_MAX_UPLOAD_BYTES must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !self.pixels_per_meter.is_finite() || self.pixels_per_meter <= 0.0 {
            return Err(anyhow!("pixels_per_meter must be a positive number"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        if self.subscriber_buffer == 0 {
            return Err(anyhow!("subscriber_buffer must be greater than zero"));
        }
        if !KNOWN_BACKENDS.contains(&self.model.backend.as_str()) {
            return Err(anyhow!(
                "unknown segmentation backend '{}' (expected one of {})",
                self.model.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<PotholeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
