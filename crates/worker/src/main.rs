use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfy_worker::config::WorkerConfig;
use comfy_worker::coordinator::{unexpected, JobCoordinator};
use comfy_worker::outcome::{JobOutcome, ResultEnvelope};
use comfy_worker_comfyui::api::ComfyUIApi;
use comfy_worker_comfyui::client::ComfyUIClient;
use comfy_worker_core::types::Job;

const DEFAULT_LOG_FILTER: &str = "comfy_worker=info,comfy_worker_comfyui=info";
const WEBSOCKET_TRACE_FILTER: &str = "tokio_tungstenite=trace,tungstenite=trace";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();

    // --- Tracing ---
    // stdout carries the result, so logs go to stderr.
    let mut filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    if config.websocket_trace {
        for directive in WEBSOCKET_TRACE_FILTER.split(',') {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(
        comfy_host = %config.comfy_host,
        workflow = %config.workflow_path.display(),
        bucket = config.bucket.is_some(),
        "Loaded worker configuration",
    );

    // --- Job ---
    let job = match read_job().context("Failed to read job") {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "No job to run");
            emit(unexpected(format!("{e:#}")), config.refresh_worker)?;
            return Err(e);
        }
    };
    tracing::info!(job_id = %job.id, "Received job");

    // --- Cancellation ---
    let cancel = CancellationToken::new();
    let watchdog = spawn_watchdog(cancel.clone(), config.job_timeout);

    let config = Arc::new(config);
    let coordinator = JobCoordinator::with_configured_store(
        Arc::clone(&config),
        ComfyUIApi::new(config.api_url()),
        ComfyUIClient::new(config.ws_url()),
    );

    let outcome = coordinator.run(&job, &cancel).await;
    watchdog.abort();

    if outcome.is_error() {
        tracing::warn!(job_id = %job.id, "Job finished with an error");
    } else {
        tracing::info!(job_id = %job.id, "Job finished");
    }

    emit(outcome, config.refresh_worker)
}

/// Print the result envelope on stdout.
fn emit(outcome: JobOutcome, refresh_worker: bool) -> anyhow::Result<()> {
    let envelope = ResultEnvelope {
        outcome,
        refresh_worker,
    };
    println!("{}", serde_json::to_string(&envelope)?);
    Ok(())
}

/// Read the job document from `JOB_INPUT_PATH`, or stdin when unset.
fn read_job() -> anyhow::Result<Job> {
    let raw = match std::env::var("JOB_INPUT_PATH") {
        Ok(path) => {
            std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?
        }
        Err(_) => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    serde_json::from_str(&raw).context("job is not valid JSON")
}

/// Cancel the job on ctrl-c or once the configured deadline passes.
fn spawn_watchdog(
    cancel: CancellationToken,
    timeout: Option<std::time::Duration>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::warn!("Interrupted, cancelling job"),
            _ = deadline => tracing::warn!(?timeout, "Job deadline reached, cancelling"),
        }
        cancel.cancel();
    })
}
