//! Model checkpoint provisioning.
//!
//! A checkpoint that is missing, or smaller than [`MIN_CHECKPOINT_BYTES`]
//! (an interrupted download), counts as absent. With the `model-download`
//! feature and a configured URL it is fetched with bounded retries.

use std::path::Path;

use anyhow::{anyhow, Result};

pub const MIN_CHECKPOINT_BYTES: u64 = 1024;
pub const MAX_DOWNLOAD_ATTEMPTS: u32 = 5;
const MAX_BACKOFF_SECS: u64 = 30;

pub fn checkpoint_present(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() >= MIN_CHECKPOINT_BYTES)
        .unwrap_or(false)
}

/// Wait before retrying after failed attempt `attempt` (1-based).
pub fn backoff_secs(attempt: u32) -> u64 {
    2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS)
}

/// Make sure a usable checkpoint exists at `path`.
pub fn ensure_checkpoint(path: &Path, url: Option<&str>) -> Result<()> {
    if checkpoint_present(path) {
        return Ok(());
    }
    match url {
        Some(url) => download_checkpoint(path, url),
        None => Err(anyhow!(
            "model checkpoint {} is missing and no download URL is configured",
            path.display()
        )),
    }
}

#[cfg(feature = "model-download")]
fn download_checkpoint(path: &Path, url: &str) -> Result<()> {
    use anyhow::Context;
    use std::time::Duration;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create checkpoint dir {}", parent.display()))?;
        }
    }

    log::info!("downloading model checkpoint from {}", url);
    let mut last_err = None;
    for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
        match fetch_to_file(path, url) {
            Ok(()) if checkpoint_present(path) => {
                log::info!("model checkpoint downloaded to {}", path.display());
                return Ok(());
            }
            Ok(()) => {
                last_err = Some(anyhow!("downloaded checkpoint is truncated"));
            }
            Err(err) => last_err = Some(err),
        }
        if attempt < MAX_DOWNLOAD_ATTEMPTS {
            let wait = backoff_secs(attempt);
            if let Some(err) = &last_err {
                log::error!(
                    "checkpoint download attempt {}/{} failed: {:#}. retrying in {}s",
                    attempt,
                    MAX_DOWNLOAD_ATTEMPTS,
                    err,
                    wait
                );
            }
            std::thread::sleep(Duration::from_secs(wait));
        }
    }
    Err(last_err
        .unwrap_or_else(|| anyhow!("checkpoint download failed"))
        .context(format!(
            "failed to download checkpoint after {} attempts",
            MAX_DOWNLOAD_ATTEMPTS
        )))
}

#[cfg(feature = "model-download")]
fn fetch_to_file(path: &Path, url: &str) -> Result<()> {
    use anyhow::Context;
    use std::time::Duration;

    let response = ureq::get(url)
        .timeout(Duration::from_secs(60))
        .call()
        .with_context(|| format!("fetch checkpoint from {}", url))?;
    let mut reader = response.into_reader();
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("create checkpoint file {}", path.display()))?;
    std::io::copy(&mut reader, &mut file).context("write checkpoint body")?;
    Ok(())
}

#[cfg(not(feature = "model-download"))]
fn download_checkpoint(path: &Path, url: &str) -> Result<()> {
    Err(anyhow!(
        "model checkpoint {} is missing; downloading from {} requires the model-download feature",
        path.display(),
        url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(4), 16);
        assert_eq!(backoff_secs(5), 30);
        assert_eq!(backoff_secs(40), 30);
    }

    #[test]
    fn truncated_checkpoint_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        assert!(!checkpoint_present(&path));

        std::fs::write(&path, vec![0u8; 100]).unwrap();
        assert!(!checkpoint_present(&path));

        std::fs::write(&path, vec![0u8; MIN_CHECKPOINT_BYTES as usize]).unwrap();
        assert!(checkpoint_present(&path));
    }

    #[test]
    fn missing_checkpoint_without_url_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_checkpoint(&dir.path().join("absent.onnx"), None).unwrap_err();
        assert!(err.to_string().contains("no download URL"));
    }
}
