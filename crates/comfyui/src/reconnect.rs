//! Bounded reconnection for a job's ComfyUI WebSocket.
//!
//! When the socket drops mid-job, [`reconnect`] retries a fixed number
//! of times with a fixed delay. Before each attempt the HTTP API is
//! pinged once: if the server process itself is gone there is nothing
//! to reconnect to, and the remaining budget is not spent.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::HealthCheck;
use crate::client::Connector;

/// Default number of reconnect attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
/// Default pause between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Tunable parameters for the reconnection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Sleep between failed attempts. Not applied after the last one.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// How a reconnection run ended.
#[derive(Debug)]
pub enum ReconnectOutcome<C> {
    /// A fresh connection, opened on attempt number `attempts`.
    Connected { channel: C, attempts: u32 },
    /// Every attempt failed to connect.
    Exhausted { attempts: u32, last_error: String },
    /// The HTTP API did not answer, so the server is presumed down.
    Unreachable { reason: String },
    /// The job was cancelled while reconnecting.
    Cancelled,
}

/// Terminal reconnection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    #[error("Connection closed and failed to reconnect after {attempts} attempts. Last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("ComfyUI HTTP unreachable during websocket reconnect: {0}")]
    Unreachable(String),

    #[error("Reconnect cancelled")]
    Cancelled,
}

impl<C> ReconnectOutcome<C> {
    /// Collapse into the new channel or a [`ReconnectError`].
    pub fn into_result(self) -> Result<C, ReconnectError> {
        match self {
            Self::Connected { channel, .. } => Ok(channel),
            Self::Exhausted {
                attempts,
                last_error,
            } => Err(ReconnectError::Exhausted {
                attempts,
                last_error,
            }),
            Self::Unreachable { reason } => Err(ReconnectError::Unreachable(reason)),
            Self::Cancelled => Err(ReconnectError::Cancelled),
        }
    }
}

/// Try to replace a dead connection.
///
/// `cause` describes why the previous connection died and is reported
/// as the last error if no attempt is ever made.
pub async fn reconnect<C, H>(
    connector: &C,
    server: &H,
    policy: &ReconnectPolicy,
    cause: &str,
    cancel: &CancellationToken,
) -> ReconnectOutcome<C::Channel>
where
    C: Connector + ?Sized,
    H: HealthCheck + ?Sized,
{
    tracing::warn!(cause, "Websocket connection closed unexpectedly, attempting to reconnect");

    let mut last_error = cause.to_string();

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return ReconnectOutcome::Cancelled;
        }

        if let Err(e) = server.ping().await {
            tracing::error!(error = %e, "ComfyUI HTTP unreachable, aborting websocket reconnect");
            return ReconnectOutcome::Unreachable {
                reason: e.to_string(),
            };
        }

        tracing::info!(attempt, max_attempts = policy.max_attempts, "Reconnect attempt");

        let result = tokio::select! {
            _ = cancel.cancelled() => return ReconnectOutcome::Cancelled,
            result = connector.connect() => result,
        };

        match result {
            Ok(channel) => {
                tracing::info!(attempt, "Websocket reconnected");
                return ReconnectOutcome::Connected {
                    channel,
                    attempts: attempt,
                };
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                last_error = e.to_string();
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return ReconnectOutcome::Cancelled,
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    tracing::error!(max_attempts = policy.max_attempts, "Max reconnection attempts reached");
    ReconnectOutcome::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    }
}
