//! Job input model and validation.
//!
//! A job carries free-form keyed parameters. Only three keys are
//! meaningful: `image` (base64, optionally wrapped in a `data:` URI),
//! `main_prompt`, and an optional `face_prompt`.

use base64::Engine;
use serde::Serialize;

use crate::error::CoreError;

/// Filename under which the input image is uploaded to ComfyUI.
pub const INPUT_IMAGE_FILENAME: &str = "input_face.png";

const MSG_NO_INPUT: &str = "Please provide input";
const MSG_INVALID_JSON: &str = "Invalid JSON format in input";
const MSG_NOT_AN_OBJECT: &str = "Input must be a JSON object";
const MSG_MISSING_IMAGE: &str = "Missing 'image' parameter (must be a base64 string)";
const MSG_MISSING_MAIN_PROMPT: &str = "Missing 'main_prompt' parameter";

/// Validated job input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInput {
    /// Base64 image payload, possibly still carrying a data URI prefix.
    pub image: String,
    pub main_prompt: String,
    /// Empty string when the caller omitted it.
    pub face_prompt: String,
}

impl JobInput {
    /// Decode the image payload into raw bytes.
    ///
    /// Anything up to and including the first `,` is treated as a data
    /// URI header (`data:image/png;base64,`) and discarded. Line breaks
    /// and other ASCII whitespace inside the payload are ignored.
    pub fn decode_image(&self) -> Result<Vec<u8>, CoreError> {
        let payload = match self.image.split_once(',') {
            Some((_, data)) => data,
            None => self.image.as_str(),
        };
        let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| CoreError::Validation(format!("Invalid base64 image data: {e}")))
    }
}

/// Validate raw job input.
///
/// Accepts either a JSON object or a string containing a JSON object.
/// `face_prompt` never causes a failure; it defaults to `""`.
pub fn validate_input(raw: Option<&serde_json::Value>) -> Result<JobInput, CoreError> {
    let raw = match raw {
        None | Some(serde_json::Value::Null) => {
            return Err(CoreError::Validation(MSG_NO_INPUT.into()))
        }
        Some(value) => value,
    };

    let parsed;
    let value = match raw {
        serde_json::Value::String(text) => {
            parsed = serde_json::from_str::<serde_json::Value>(text)
                .map_err(|_| CoreError::Validation(MSG_INVALID_JSON.into()))?;
            &parsed
        }
        other => other,
    };

    let obj = value
        .as_object()
        .ok_or_else(|| CoreError::Validation(MSG_NOT_AN_OBJECT.into()))?;

    let image = non_empty_string(obj, "image")
        .ok_or_else(|| CoreError::Validation(MSG_MISSING_IMAGE.into()))?;
    let main_prompt = non_empty_string(obj, "main_prompt")
        .ok_or_else(|| CoreError::Validation(MSG_MISSING_MAIN_PROMPT.into()))?;
    let face_prompt = obj
        .get("face_prompt")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(JobInput {
        image,
        main_prompt,
        face_prompt,
    })
}

fn non_empty_string(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
