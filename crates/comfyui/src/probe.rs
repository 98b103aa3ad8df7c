//! Availability probing.
//!
//! Polls the ComfyUI liveness endpoint until it answers or the retry
//! budget runs out. Failed attempts are logged at debug level and never
//! surface as errors.

use std::time::Duration;

use crate::api::HealthCheck;

/// Default attempt budget for the pre-flight check.
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 500;
/// Default pause between pre-flight attempts.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Probe `server` up to `max_attempts` times, sleeping `interval`
/// between attempts.
///
/// Returns `true` on the first success, `false` once the budget is
/// exhausted. No sleep follows the final attempt.
pub async fn wait_until_available<H>(server: &H, max_attempts: u32, interval: Duration) -> bool
where
    H: HealthCheck + ?Sized,
{
    for attempt in 1..=max_attempts {
        match server.ping().await {
            Ok(()) => {
                tracing::info!(attempt, "ComfyUI API is reachable");
                return true;
            }
            Err(e) => {
                tracing::debug!(attempt, max_attempts, error = %e, "ComfyUI API not reachable yet");
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    tracing::warn!(max_attempts, "ComfyUI API still unreachable, giving up");
    false
}
