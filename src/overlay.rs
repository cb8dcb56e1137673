//! Overlay rendering and on-disk artifact storage.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::segment::Mask;

pub const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

pub struct OverlayRenderer;

impl OverlayRenderer {
    /// Copy of `image` with every covered pixel painted [`HIGHLIGHT_COLOR`].
    pub fn render(image: &RgbImage, mask: &Mask) -> RgbImage {
        let mut overlay = image.clone();
        for (x, y, pixel) in overlay.enumerate_pixels_mut() {
            if mask.get(x, y) {
                *pixel = HIGHLIGHT_COLOR;
            }
        }
        overlay
    }
}

/// Identifier of a stored overlay.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub file_name: String,
    pub path: PathBuf,
}

impl ArtifactRef {
    /// Path under which the transport serves this artifact.
    pub fn url(&self) -> String {
        format!("/image/{}", self.file_name)
    }
}

/// Directory of JPEG overlays.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create upload dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encode and write `overlay`; the name carries the UTC time and a
    /// content hash so two overlays in the same second do not collide.
    pub fn save(&self, overlay: &RgbImage) -> Result<ArtifactRef> {
        let digest = Sha256::digest(overlay.as_raw());
        let stamp = file_stamp(Utc::now());
        let file_name = format!("pothole_{}_{}.jpg", stamp, hex::encode(&digest[..4]));
        let path = self.dir.join(&file_name);
        overlay
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("write overlay {}", path.display()))?;
        Ok(ArtifactRef { file_name, path })
    }

    /// Resolve a served file name; names with separators or `..` are refused.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        if file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name.contains("..")
        {
            return Err(anyhow!("invalid artifact name '{}'", file_name));
        }
        Ok(self.dir.join(file_name))
    }

    pub fn read(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(file_name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read artifact {}", path.display())),
        }
    }
}

/// `YYYYmmdd_HHMMSS` in UTC.
fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
