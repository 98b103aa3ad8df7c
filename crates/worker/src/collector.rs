//! Result collection after a prompt finished.
//!
//! Reads the prompt's history, downloads every non-temporary image and
//! hands the bytes to the configured [`ArtifactStore`]. A failure on one
//! artifact is recorded and the rest are still collected. An empty body
//! counts as a failed fetch.

use comfy_worker_comfyui::api::{ComfyUIApiError, ComfyUIHttp};
use comfy_worker_comfyui::history::{artifacts_from_history, HistoryError};

use crate::output::ArtifactStore;

/// Artifacts gathered for one job.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectedOutput {
    /// One entry per artifact, already encoded for the result.
    pub images: Vec<String>,
    /// Per-artifact failures.
    pub errors: Vec<String>,
}

/// Fatal collection failures.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Failed to fetch history: {0}")]
    History(#[from] ComfyUIApiError),

    #[error(transparent)]
    Malformed(#[from] HistoryError),
}

/// Collect the outputs of `prompt_id`.
pub async fn collect_outputs<H>(
    http: &H,
    store: &dyn ArtifactStore,
    job_id: &str,
    prompt_id: &str,
) -> Result<CollectedOutput, CollectError>
where
    H: ComfyUIHttp + ?Sized,
{
    let history = http.get_history(prompt_id).await?;
    let found = artifacts_from_history(&history, prompt_id)?;

    let mut collected = CollectedOutput::default();
    for artifact in found.artifacts.iter().filter(|a| !a.is_temporary()) {
        tracing::debug!(
            filename = %artifact.filename,
            subfolder = %artifact.subfolder,
            kind = %artifact.kind,
            "Fetching image data",
        );

        let bytes = match http.view(artifact).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                tracing::warn!(filename = %artifact.filename, "Server returned no image data");
                collected
                    .errors
                    .push(format!("Failed to fetch image data for {}", artifact.filename));
                continue;
            }
            Err(e) => {
                tracing::warn!(filename = %artifact.filename, error = %e, "Failed to fetch image data");
                collected
                    .errors
                    .push(format!("Failed to fetch image data for {}", artifact.filename));
                continue;
            }
        };

        match store.store(job_id, bytes).await {
            Ok(image) => collected.images.push(image),
            Err(e) => {
                tracing::warn!(filename = %artifact.filename, mode = store.mode(), error = %e, "Failed to store image");
                collected
                    .errors
                    .push(format!("Failed to store image {}: {e}", artifact.filename));
            }
        }
    }

    for unnamed in found.unnamed.iter().filter(|u| !u.is_temporary()) {
        collected.errors.push(format!(
            "Failed to fetch image data for unnamed image from node {}",
            unnamed.node_id
        ));
    }

    tracing::info!(
        prompt_id,
        images = collected.images.len(),
        errors = collected.errors.len(),
        "Collected outputs",
    );
    Ok(collected)
}
