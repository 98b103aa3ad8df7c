//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module decodes them into a
//! strongly-typed [`ComfyUIMessage`] enum.
//!
//! Parsing is two-staged: the envelope must be valid JSON (anything else
//! is a protocol violation), while an unknown `type` or a payload that
//! does not match the expected shape degrades to
//! [`ComfyUIMessage::Other`] so the caller can keep listening.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// All ComfyUI WebSocket message types the worker distinguishes.
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// A node failed while executing.
    ExecutionError(ErrorData),

    /// Any other message, or a known type whose payload did not decode.
    Other { kind: Option<String> },
}

/// Raw `{type, data}` envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i64,
    /// Total number of steps.
    pub max: i64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    #[serde(default)]
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_message: Option<String>,
    #[serde(default)]
    pub exception_type: Option<String>,
}

impl ErrorData {
    /// One-line diagnostic naming the failing node.
    pub fn describe(&self) -> String {
        format!(
            "Node Type: {}, Node ID: {}, Message: {}",
            self.node_type.as_deref().unwrap_or("unknown"),
            self.node_id.as_deref().unwrap_or("unknown"),
            self.exception_message.as_deref().unwrap_or(""),
        )
    }
}

impl ComfyUIMessage {
    /// The `prompt_id` the message refers to, if it carries one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionStart(d) => Some(&d.prompt_id),
            Self::ExecutionCached(d) => Some(&d.prompt_id),
            Self::Executing(d) => d.prompt_id.as_deref(),
            Self::Progress(d) => d.prompt_id.as_deref(),
            Self::Executed(d) => Some(&d.prompt_id),
            Self::ExecutionError(d) => d.prompt_id.as_deref(),
            Self::Status(_) | Self::Other { .. } => None,
        }
    }

    /// Whether this is the completion signal for `prompt_id`: an
    /// `executing` message with no node attached and a matching id.
    pub fn is_completion_for(&self, prompt_id: &str) -> bool {
        matches!(
            self,
            Self::Executing(ExecutingData { node: None, prompt_id: Some(id) }) if id == prompt_id
        )
    }
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` only when the frame is not a JSON envelope.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let Some(kind) = envelope.kind else {
        return Ok(ComfyUIMessage::Other { kind: None });
    };
    let data = envelope.data;

    let msg = match kind.as_str() {
        "status" => decode(&kind, data, ComfyUIMessage::Status),
        "execution_start" => decode(&kind, data, ComfyUIMessage::ExecutionStart),
        "execution_cached" => decode(&kind, data, ComfyUIMessage::ExecutionCached),
        "executing" => decode(&kind, data, ComfyUIMessage::Executing),
        "progress" => decode(&kind, data, ComfyUIMessage::Progress),
        "executed" => decode(&kind, data, ComfyUIMessage::Executed),
        "execution_error" => decode(&kind, data, ComfyUIMessage::ExecutionError),
        _ => ComfyUIMessage::Other { kind: Some(kind) },
    };
    Ok(msg)
}

fn decode<T, F>(kind: &str, data: serde_json::Value, wrap: F) -> ComfyUIMessage
where
    T: DeserializeOwned,
    F: FnOnce(T) -> ComfyUIMessage,
{
    match serde_json::from_value::<T>(data) {
        Ok(payload) => wrap(payload),
        Err(e) => {
            tracing::debug!(kind, error = %e, "Unexpected ComfyUI message payload");
            ComfyUIMessage::Other {
                kind: Some(kind.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}}}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::Status(data) => {
                assert_eq!(data.status.exec_info.queue_remaining, 3);
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_cached_without_nodes() {
        let json = r#"{"type":"execution_cached","data":{"prompt_id":"abc"}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::ExecutionCached(data) => {
                assert_eq!(data.prompt_id, "abc");
                assert!(data.nodes.is_empty());
            }
            other => panic!("Expected ExecutionCached, got {other:?}"),
        }
    }

    #[test]
    fn executing_finished_is_completion_for_matching_prompt() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        assert!(msg.is_completion_for("xyz"));
        assert!(!msg.is_completion_for("other"));
    }

    #[test]
    fn executing_with_node_is_not_completion() {
        let json = r#"{"type":"executing","data":{"node":"42","prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        assert!(!msg.is_completion_for("xyz"));
        assert_eq!(msg.prompt_id(), Some("xyz"));
    }

    #[test]
    fn executing_without_prompt_id_is_not_completion() {
        let json = r#"{"type":"executing","data":{"node":null}}"#;
        assert!(!parse_message(json).unwrap().is_completion_for("xyz"));
    }

    #[test]
    fn parse_progress_message() {
        let json = r#"{"type":"progress","data":{"value":5,"max":20,"prompt_id":"p"}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::Progress(data) => {
                assert_eq!(data.value, 5);
                assert_eq!(data.max, 20);
                assert_eq!(data.prompt_id.as_deref(), Some("p"));
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_error_message() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","node_type":"KSampler","exception_message":"out of memory","exception_type":"RuntimeError"}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::ExecutionError(data) => {
                assert_eq!(data.prompt_id.as_deref(), Some("abc"));
                assert_eq!(
                    data.describe(),
                    "Node Type: KSampler, Node ID: 5, Message: out of memory"
                );
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_other() {
        let json = r#"{"type":"crystools.monitor","data":{"cpu":12}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::Other { kind } => assert_eq!(kind.as_deref(), Some("crystools.monitor")),
            other => panic!("Expected Other, got {other:?}"),
        }
    }

    #[test]
    fn known_type_with_bad_payload_is_other() {
        let json = r#"{"type":"progress","data":{"value":"lots"}}"#;
        assert!(matches!(
            parse_message(json).unwrap(),
            ComfyUIMessage::Other { .. }
        ));
    }

    #[test]
    fn missing_type_is_other() {
        let json = r#"{"data":{}}"#;
        assert!(matches!(
            parse_message(json).unwrap(),
            ComfyUIMessage::Other { kind: None }
        ));
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }
}
