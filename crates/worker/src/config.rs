use std::path::PathBuf;
use std::time::Duration;

use comfy_worker_comfyui::probe::{DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_INTERVAL};
use comfy_worker_comfyui::reconnect::{
    ReconnectPolicy, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
use comfy_worker_comfyui::workflow::InjectionPoints;

const DEFAULT_COMFY_HOST: &str = "127.0.0.1:8188";
const DEFAULT_WORKFLOW_PATH: &str = "workflow_api.json";
const DEFAULT_BUCKET_REGION: &str = "us-east-1";

/// Worker configuration loaded from environment variables.
///
/// Built once at startup and handed to each job's coordinator; nothing
/// reads the environment after that.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `host:port` of the ComfyUI server.
    pub comfy_host: String,
    /// Pre-flight availability budget.
    pub probe_attempts: u32,
    pub probe_interval: Duration,
    /// WebSocket reconnection budget.
    pub reconnect: ReconnectPolicy,
    /// Ask the host to recycle the worker after each job.
    pub refresh_worker: bool,
    /// Enable websocket frame tracing.
    pub websocket_trace: bool,
    pub workflow_path: PathBuf,
    pub injection_points: InjectionPoints,
    /// Overall deadline for one job, if any.
    pub job_timeout: Option<Duration>,
    /// Set when artifacts should go to object storage instead of inline.
    pub bucket: Option<BucketConfig>,
}

/// S3-compatible object storage settings.
#[derive(Clone)]
pub struct BucketConfig {
    pub endpoint_url: String,
    /// Explicit bucket name; derived from the endpoint host when absent.
    pub bucket_name: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
}

impl std::fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default              |
    /// |--------------------------------|----------------------|
    /// | `COMFY_HOST`                   | `127.0.0.1:8188`     |
    /// | `WEBSOCKET_RECONNECT_ATTEMPTS` | `5`                  |
    /// | `WEBSOCKET_RECONNECT_DELAY_S`  | `3`                  |
    /// | `REFRESH_WORKER`               | `false`              |
    /// | `WEBSOCKET_TRACE`              | `false`              |
    /// | `WORKFLOW_PATH`                | `workflow_api.json`  |
    /// | `JOB_TIMEOUT_SECS`             | unset (no deadline)  |
    /// | `BUCKET_ENDPOINT_URL`          | unset (inline output)|
    /// | `BUCKET_NAME`                  | from endpoint host   |
    /// | `BUCKET_ACCESS_KEY_ID`         | SDK default chain    |
    /// | `BUCKET_SECRET_ACCESS_KEY`     | SDK default chain    |
    /// | `BUCKET_REGION`                | `us-east-1`          |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back
    /// to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let comfy_host = get("COMFY_HOST").unwrap_or_else(|| DEFAULT_COMFY_HOST.into());

        let max_attempts = parse_or(
            "WEBSOCKET_RECONNECT_ATTEMPTS",
            get("WEBSOCKET_RECONNECT_ATTEMPTS"),
            DEFAULT_RECONNECT_ATTEMPTS,
        );
        let delay_secs = parse_or(
            "WEBSOCKET_RECONNECT_DELAY_S",
            get("WEBSOCKET_RECONNECT_DELAY_S"),
            DEFAULT_RECONNECT_DELAY.as_secs(),
        );

        let job_timeout = get("JOB_TIMEOUT_SECS")
            .and_then(|v| match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Some(secs),
                _ => {
                    tracing::warn!(value = %v, "Ignoring invalid JOB_TIMEOUT_SECS");
                    None
                }
            })
            .map(Duration::from_secs);

        let bucket = get("BUCKET_ENDPOINT_URL").map(|endpoint_url| BucketConfig {
            endpoint_url,
            bucket_name: get("BUCKET_NAME"),
            access_key_id: get("BUCKET_ACCESS_KEY_ID"),
            secret_access_key: get("BUCKET_SECRET_ACCESS_KEY"),
            region: get("BUCKET_REGION").unwrap_or_else(|| DEFAULT_BUCKET_REGION.into()),
        });

        Self {
            comfy_host,
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            reconnect: ReconnectPolicy {
                max_attempts,
                delay: Duration::from_secs(delay_secs),
            },
            refresh_worker: flag(get("REFRESH_WORKER")),
            websocket_trace: flag(get("WEBSOCKET_TRACE")),
            workflow_path: get("WORKFLOW_PATH")
                .unwrap_or_else(|| DEFAULT_WORKFLOW_PATH.into())
                .into(),
            injection_points: InjectionPoints::default(),
            job_timeout,
            bucket,
        }
    }

    /// HTTP base URL of the ComfyUI server.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.comfy_host)
    }

    /// WebSocket base URL of the ComfyUI server.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.comfy_host)
    }
}

fn flag(value: Option<String>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match value {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, %default, "Invalid value, using default");
            default
        }),
    }
}
