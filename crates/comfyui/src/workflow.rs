//! Workflow template loading and parameterization.
//!
//! A template is a ComfyUI API-format workflow (`{"<node_id>": {"inputs":
//! {...}, "class_type": ...}}`) treated as an opaque document with three
//! named injection points. The points are checked once at load time, so
//! rendering a job can never miss a key.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Address of one input field inside the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionPoint {
    pub node_id: String,
    pub input: String,
}

impl InjectionPoint {
    pub fn new(node_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input: input.into(),
        }
    }
}

/// The three slots a job fills in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionPoints {
    pub main_prompt: InjectionPoint,
    pub face_prompt: InjectionPoint,
    pub input_image: InjectionPoint,
}

impl Default for InjectionPoints {
    /// Slots of the bundled face-detailer workflow.
    fn default() -> Self {
        Self {
            main_prompt: InjectionPoint::new("519", "prompt"),
            face_prompt: InjectionPoint::new("533", "prompt"),
            input_image: InjectionPoint::new("586", "image"),
        }
    }
}

/// Values injected into a template for one job.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowParams<'a> {
    pub main_prompt: &'a str,
    pub face_prompt: &'a str,
    /// Name of the uploaded input image on the server.
    pub input_image: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("{0} not found.")]
    NotFound(String),

    #[error("Failed to parse {0}.")]
    Parse(String),

    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Workflow template has no injection point {node_id}.inputs.{input}")]
    MissingSlot { node_id: String, input: String },
}

/// A validated workflow template.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    document: serde_json::Value,
    points: InjectionPoints,
}

impl WorkflowTemplate {
    /// Read and validate a template from disk.
    ///
    /// A missing file and an unparseable file map to distinct errors.
    pub async fn load(path: &Path, points: InjectionPoints) -> Result<Self, TemplateError> {
        let display = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(display))
            }
            Err(e) => {
                return Err(TemplateError::Io {
                    path: display,
                    reason: e.to_string(),
                })
            }
        };

        let document: serde_json::Value =
            serde_json::from_str(&text).map_err(|_| TemplateError::Parse(display))?;
        Self::from_value(document, points)
    }

    /// Validate an in-memory template document.
    pub fn from_value(
        document: serde_json::Value,
        points: InjectionPoints,
    ) -> Result<Self, TemplateError> {
        for point in [&points.main_prompt, &points.face_prompt, &points.input_image] {
            let has_slot = document
                .get(&point.node_id)
                .and_then(|node| node.get("inputs"))
                .and_then(|inputs| inputs.as_object())
                .is_some_and(|inputs| inputs.contains_key(&point.input));
            if !has_slot {
                return Err(TemplateError::MissingSlot {
                    node_id: point.node_id.clone(),
                    input: point.input.clone(),
                });
            }
        }
        Ok(Self { document, points })
    }

    /// Produce the workflow to submit for one job.
    pub fn render(&self, params: &WorkflowParams<'_>) -> serde_json::Value {
        let mut workflow = self.document.clone();
        set_slot(&mut workflow, &self.points.main_prompt, params.main_prompt);
        set_slot(&mut workflow, &self.points.face_prompt, params.face_prompt);
        set_slot(&mut workflow, &self.points.input_image, params.input_image);
        workflow
    }
}

fn set_slot(workflow: &mut serde_json::Value, point: &InjectionPoint, value: &str) {
    // Slots were verified in `from_value`.
    if let Some(inputs) = workflow
        .get_mut(&point.node_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(|inputs| inputs.as_object_mut())
    {
        inputs.insert(
            point.input.clone(),
            serde_json::Value::String(value.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn template_doc() -> serde_json::Value {
        json!({
            "519": { "class_type": "CLIPTextEncode", "inputs": { "prompt": "", "clip": ["4", 1] } },
            "533": { "class_type": "CLIPTextEncode", "inputs": { "prompt": "" } },
            "586": { "class_type": "LoadImage", "inputs": { "image": "placeholder.png" } },
            "600": { "class_type": "SaveImage", "inputs": { "filename_prefix": "out" } }
        })
    }

    #[test]
    fn render_fills_all_slots_and_keeps_the_rest() {
        let template = WorkflowTemplate::from_value(template_doc(), InjectionPoints::default()).unwrap();
        let workflow = template.render(&WorkflowParams {
            main_prompt: "a knight",
            face_prompt: "",
            input_image: "input_face.png",
        });

        assert_eq!(workflow["519"]["inputs"]["prompt"], "a knight");
        assert_eq!(workflow["519"]["inputs"]["clip"], json!(["4", 1]));
        assert_eq!(workflow["533"]["inputs"]["prompt"], "");
        assert_eq!(workflow["586"]["inputs"]["image"], "input_face.png");
        assert_eq!(workflow["600"], template_doc()["600"]);
    }

    #[test]
    fn render_does_not_mutate_template() {
        let template = WorkflowTemplate::from_value(template_doc(), InjectionPoints::default()).unwrap();
        let _ = template.render(&WorkflowParams {
            main_prompt: "x",
            face_prompt: "y",
            input_image: "z.png",
        });
        let again = template.render(&WorkflowParams {
            main_prompt: "a",
            face_prompt: "b",
            input_image: "c.png",
        });
        assert_eq!(again["519"]["inputs"]["prompt"], "a");
    }

    #[test]
    fn missing_slot_is_rejected_at_load() {
        let mut doc = template_doc();
        doc.as_object_mut().unwrap().remove("533");
        assert_matches!(
            WorkflowTemplate::from_value(doc, InjectionPoints::default()),
            Err(TemplateError::MissingSlot { node_id, .. }) if node_id == "533"
        );
    }

    #[tokio::test]
    async fn missing_file_reports_not_found() {
        let err = WorkflowTemplate::load(
            Path::new("/nonexistent/dir/workflow_api.json"),
            InjectionPoints::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "workflow_api.json not found.");
    }

    #[tokio::test]
    async fn corrupt_file_reports_parse_failure() {
        let path = std::env::temp_dir().join(format!("workflow-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = WorkflowTemplate::load(&path, InjectionPoints::default())
            .await
            .unwrap_err();
        assert_matches!(err, TemplateError::Parse(_));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
