use serde::Deserialize;

/// Opaque identifier assigned to a job by the hosting system.
pub type JobId = String;

/// A job request as delivered by the hosting system.
///
/// `input` is kept as raw JSON; it may be an object or a JSON-encoded
/// string and is checked by [`validate_input`](crate::input::validate_input).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: JobId,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}
