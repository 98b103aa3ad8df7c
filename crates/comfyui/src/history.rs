//! Artifact enumeration from ComfyUI execution history.
//!
//! `GET /history/{prompt_id}` returns
//! `{"<prompt_id>": {"outputs": {"<node_id>": {"images": [...]}}}}`.
//! Each image entry names a file by `(filename, subfolder, type)`.

use serde::Deserialize;

/// Artifact kind ComfyUI uses for previews and intermediate files.
pub const KIND_TEMP: &str = "temp";

/// Lookup key for one artifact produced by a node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output`, `input` or `temp`.
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl ArtifactDescriptor {
    /// Temporary artifacts are never part of a job's result.
    pub fn is_temporary(&self) -> bool {
        self.kind == KIND_TEMP
    }
}

/// An image entry listed without a usable `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnnamedArtifact {
    pub node_id: String,
    pub kind: String,
}

impl UnnamedArtifact {
    pub fn is_temporary(&self) -> bool {
        self.kind == KIND_TEMP
    }
}

/// Every image entry recorded for one prompt, in the order the server
/// listed them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HistoryOutputs {
    pub artifacts: Vec<ArtifactDescriptor>,
    /// Entries that cannot be fetched because they carry no filename.
    pub unnamed: Vec<UnnamedArtifact>,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Malformed history response: {0}")]
    Malformed(String),
}

/// List every image artifact recorded for `prompt_id`, temporary ones
/// included, in node order.
///
/// A missing prompt entry or missing `outputs` yields nothing. Entries
/// without a filename are reported separately in
/// [`HistoryOutputs::unnamed`].
pub fn artifacts_from_history(
    history: &serde_json::Value,
    prompt_id: &str,
) -> Result<HistoryOutputs, HistoryError> {
    let root = history
        .as_object()
        .ok_or_else(|| HistoryError::Malformed("expected a JSON object".into()))?;

    let Some(outputs) = root
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(|outputs| outputs.as_object())
    else {
        return Ok(HistoryOutputs::default());
    };

    tracing::info!(prompt_id, nodes = outputs.len(), "Processing output nodes");

    let mut found = HistoryOutputs::default();
    for (node_id, node_output) in outputs {
        let Some(images) = node_output.get("images").and_then(|v| v.as_array()) else {
            continue;
        };
        for image in images {
            match serde_json::from_value::<ArtifactDescriptor>(image.clone()) {
                Ok(descriptor) => found.artifacts.push(descriptor),
                Err(e) => {
                    tracing::warn!(node_id = %node_id, error = %e, "Image entry has no usable filename");
                    found.unnamed.push(UnnamedArtifact {
                        node_id: node_id.clone(),
                        kind: image
                            .get("type")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
            }
        }
    }
    Ok(found)
}
