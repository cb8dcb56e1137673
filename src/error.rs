use thiserror::Error;

/// Outcome taxonomy of a single pipeline run.
///
/// Every variant is surfaced to the caller as its own user-visible outcome.
/// None of them is retried inside the pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// The request itself is unusable (missing or undecodable image, bad coordinates).
    #[error("invalid request: {0}")]
    InvalidInput(String),

    /// The segmentation capability was never successfully initialized.
    #[error("segmentation model unavailable: {0}")]
    ModelUnavailable(String),

    /// Mask computation failed for this image.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Segmentation ran but covered no pixels. Expected negative outcome.
    #[error("no pothole detected")]
    NoDetection,

    /// The detection store could not persist or read records.
    #[error("detection store unavailable: {0}")]
    StoreUnavailable(String),

    /// The overlay artifact could not be encoded or written.
    #[error("overlay artifact failed: {0}")]
    Artifact(String),
}

impl PipelineError {
    /// Short stable code used by the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::Inference(_) => "inference_error",
            PipelineError::NoDetection => "no_detection",
            PipelineError::StoreUnavailable(_) => "store_unavailable",
            PipelineError::Artifact(_) => "artifact_error",
        }
    }

    pub(crate) fn inference(err: anyhow::Error) -> Self {
        PipelineError::Inference(format!("{:#}", err))
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        PipelineError::StoreUnavailable(format!("{:#}", err))
    }

    pub(crate) fn artifact(err: anyhow::Error) -> Self {
        PipelineError::Artifact(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn store_error_keeps_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow!("disk I/O error")).context("insert detection");
        let mapped = PipelineError::store(err.unwrap_err());
        assert_eq!(
            mapped,
            PipelineError::StoreUnavailable("insert detection: disk I/O error".to_string())
        );
        assert_eq!(mapped.code(), "store_unavailable");
    }
}
