//! Execution tracking for one submitted prompt.
//!
//! [`track`] reads frames from the job's WebSocket until ComfyUI
//! signals that the tracked prompt finished. Node-level execution errors
//! are collected and do not stop the loop, since other branches of the
//! graph may still run. A dropped socket is replaced through
//! [`reconnect`](crate::reconnect::reconnect) and listening resumes on
//! the new connection with the same `prompt_id`.

use tokio_util::sync::CancellationToken;

use crate::api::HealthCheck;
use crate::client::{ComfyUIClientError, Connector, FrameSource, Incoming};
use crate::messages::{parse_message, ComfyUIMessage};
use crate::reconnect::{reconnect, ReconnectError, ReconnectPolicy};

/// Summary of a completed tracking run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackReport {
    /// Formatted node-level errors, in arrival order.
    pub errors: Vec<String>,
    /// How many times the socket was replaced.
    pub reconnects: u32,
}

/// Fatal tracking failures.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// A text frame was not a JSON envelope.
    #[error("Malformed message from ComfyUI: {0}")]
    Malformed(String),

    #[error(transparent)]
    Transport(#[from] ComfyUIClientError),

    #[error("Websocket connection closed unexpectedly: {0}")]
    Reconnect(ReconnectError),

    #[error("Job cancelled while waiting for execution to finish")]
    Cancelled,
}

impl From<ReconnectError> for TrackError {
    fn from(e: ReconnectError) -> Self {
        match e {
            ReconnectError::Cancelled => Self::Cancelled,
            other => Self::Reconnect(other),
        }
    }
}

/// Follow `prompt_id` on `channel` until it completes.
///
/// When the connection drops, `*channel` is replaced by a reconnected
/// one, so the caller always holds the live handle and can close it.
/// Cancelling `cancel` unblocks a pending receive.
pub async fn track<C, H>(
    channel: &mut C::Channel,
    connector: &C,
    server: &H,
    policy: &ReconnectPolicy,
    prompt_id: &str,
    cancel: &CancellationToken,
) -> Result<TrackReport, TrackError>
where
    C: Connector + ?Sized,
    H: HealthCheck + ?Sized,
{
    let mut report = TrackReport::default();
    tracing::info!(prompt_id, "Waiting for workflow execution");

    loop {
        let incoming = tokio::select! {
            _ = cancel.cancelled() => return Err(TrackError::Cancelled),
            incoming = channel.next_frame() => incoming?,
        };

        match incoming {
            Incoming::Binary => continue,
            Incoming::Closed(reason) => {
                let fresh = reconnect(connector, server, policy, &reason, cancel)
                    .await
                    .into_result()?;
                *channel = fresh;
                report.reconnects += 1;
            }
            Incoming::Text(text) => {
                let msg = parse_message(&text).map_err(|e| TrackError::Malformed(e.to_string()))?;

                if msg.is_completion_for(prompt_id) {
                    tracing::info!(prompt_id, errors = report.errors.len(), "Execution finished");
                    return Ok(report);
                }

                if msg.prompt_id() != Some(prompt_id) {
                    continue;
                }
                observe(&msg, prompt_id, &mut report);
            }
        }
    }
}

/// Handle a non-terminal message that belongs to the tracked prompt.
fn observe(msg: &ComfyUIMessage, prompt_id: &str, report: &mut TrackReport) {
    match msg {
        ComfyUIMessage::ExecutionError(data) => {
            let details = data.describe();
            tracing::error!(prompt_id, details = %details, "Execution error received");
            report
                .errors
                .push(format!("Workflow execution error: {details}"));
        }
        ComfyUIMessage::ExecutionStart(_) => {
            tracing::info!(prompt_id, "Execution started");
        }
        ComfyUIMessage::ExecutionCached(data) => {
            tracing::debug!(prompt_id, cached = data.nodes.len(), "Execution used cache");
        }
        ComfyUIMessage::Executing(data) => {
            tracing::debug!(prompt_id, node = ?data.node, "Executing node");
        }
        ComfyUIMessage::Progress(data) => {
            let percent = if data.max > 0 {
                data.value * 100 / data.max
            } else {
                0
            };
            tracing::debug!(prompt_id, value = data.value, max = data.max, percent, "Generation progress");
        }
        ComfyUIMessage::Executed(data) => {
            tracing::debug!(prompt_id, node = %data.node, "Node executed with output");
        }
        ComfyUIMessage::Status(_) | ComfyUIMessage::Other { .. } => {}
    }
}
