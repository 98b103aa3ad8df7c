//! Job coordination.
//!
//! [`JobCoordinator`] runs one job end to end: validate, wait for the
//! server, upload the input image, render the workflow, open the
//! websocket, submit, track, close, collect, and decide the verdict.
//! It owns exactly one connection at a time and closes it on every path
//! once it has been opened.
//!
//! The artifact store is built from configuration only after the input
//! validated; a bad store setup is reported through the result envelope.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use comfy_worker_comfyui::api::{ComfyUIApiError, ComfyUIHttp};
use comfy_worker_comfyui::client::{ComfyUIClientError, Connector, FrameSource};
use comfy_worker_comfyui::probe::wait_until_available;
use comfy_worker_comfyui::tracker::{track, TrackError, TrackReport};
use comfy_worker_comfyui::workflow::{WorkflowParams, WorkflowTemplate};
use comfy_worker_core::input::{validate_input, JobInput, INPUT_IMAGE_FILENAME};
use comfy_worker_core::types::Job;

use crate::collector::{collect_outputs, CollectError, CollectedOutput};
use crate::config::WorkerConfig;
use crate::outcome::JobOutcome;
use crate::output::{store_from_config, ArtifactStore, StorageError};

const MSG_UPLOAD_FAILED: &str = "Failed to upload input image";
const MSG_JOB_FAILED: &str = "Job failed with errors";

/// Report an unclassified failure the way every fatal path does.
pub fn unexpected(e: impl std::fmt::Display) -> JobOutcome {
    JobOutcome::error(format!("An unexpected error occurred: {e}"))
}

/// Where the coordinator gets its artifact store from.
enum StoreSource {
    Ready(Arc<dyn ArtifactStore>),
    FromConfig,
}

/// Fatal failures once the connection phase has started.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Connect(#[from] ComfyUIClientError),

    #[error("Error communicating with ComfyUI: {0}")]
    Submit(#[from] ComfyUIApiError),

    #[error("Missing 'prompt_id' in queue response: {0}")]
    MissingPromptId(String),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error(transparent)]
    Collect(#[from] CollectError),
}

/// Runs a single job against one ComfyUI server.
///
/// `connector` carries the job's correlation id, so a coordinator is
/// built per job.
pub struct JobCoordinator<H, C> {
    config: Arc<WorkerConfig>,
    http: H,
    connector: C,
    store: StoreSource,
}

impl<H, C> JobCoordinator<H, C>
where
    H: ComfyUIHttp,
    C: Connector,
{
    pub fn new(config: Arc<WorkerConfig>, http: H, connector: C, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            config,
            http,
            connector,
            store: StoreSource::Ready(store),
        }
    }

    /// Build the artifact store from `config.bucket` once a job's input
    /// has validated.
    pub fn with_configured_store(config: Arc<WorkerConfig>, http: H, connector: C) -> Self {
        Self {
            config,
            http,
            connector,
            store: StoreSource::FromConfig,
        }
    }

    async fn resolve_store(&self) -> Result<Arc<dyn ArtifactStore>, StorageError> {
        match &self.store {
            StoreSource::Ready(store) => Ok(Arc::clone(store)),
            StoreSource::FromConfig => Ok(store_from_config(self.config.bucket.as_ref()).await?.into()),
        }
    }

    /// Run `job` to a verdict. Never panics on remote misbehaviour; every
    /// failure is reported through the returned [`JobOutcome`].
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> JobOutcome {
        let job_id = job.id.as_str();

        let input = match validate_input(job.input.as_ref()) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Rejected job input");
                return JobOutcome::error(e.to_string());
            }
        };

        let store = match self.resolve_store().await {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(job_id, error = %e, "Artifact output unavailable");
                return unexpected(e);
            }
        };

        if !wait_until_available(&self.http, self.config.probe_attempts, self.config.probe_interval).await {
            return JobOutcome::error(format!(
                "ComfyUI server ({}) not reachable.",
                self.config.comfy_host
            ));
        }

        let image_name = match self.upload_input(&input).await {
            Ok(name) => name,
            Err(message) => {
                tracing::error!(job_id, error = %message, "Input upload failed");
                return JobOutcome::error_with_details(MSG_UPLOAD_FAILED, vec![message]);
            }
        };

        let template = match WorkflowTemplate::load(
            &self.config.workflow_path,
            self.config.injection_points.clone(),
        )
        .await
        {
            Ok(template) => template,
            Err(e) => {
                tracing::error!(job_id, error = %e, "Workflow template unavailable");
                return JobOutcome::error(e.to_string());
            }
        };

        let workflow = template.render(&WorkflowParams {
            main_prompt: &input.main_prompt,
            face_prompt: &input.face_prompt,
            input_image: &image_name,
        });

        match self.execute(job_id, &workflow, store.as_ref(), cancel).await {
            Ok((report, collected)) => verdict(report, collected),
            Err(e) => {
                tracing::error!(job_id, error = %e, "Job aborted");
                unexpected(e)
            }
        }
    }

    /// Decode and upload the input image. Returns the server-side name
    /// or a message for the result details.
    async fn upload_input(&self, input: &JobInput) -> Result<String, String> {
        tracing::info!(filename = INPUT_IMAGE_FILENAME, "Uploading input image");

        let bytes = input
            .decode_image()
            .map_err(|e| format!("Error uploading {INPUT_IMAGE_FILENAME}: {e}"))?;

        let uploaded = self
            .http
            .upload_image(INPUT_IMAGE_FILENAME, bytes)
            .await
            .map_err(|e| format!("Error uploading {INPUT_IMAGE_FILENAME}: {e}"))?;

        tracing::info!(filename = %uploaded.name, "Uploaded input image");
        Ok(uploaded.name)
    }

    /// Connection phase. The channel is closed before collection starts
    /// and on every error path after it was opened.
    async fn execute(
        &self,
        job_id: &str,
        workflow: &serde_json::Value,
        store: &dyn ArtifactStore,
        cancel: &CancellationToken,
    ) -> Result<(TrackReport, CollectedOutput), JobError> {
        let mut channel = self.connector.connect().await?;

        let tracked = self.submit_and_track(&mut channel, workflow, cancel).await;
        channel.close().await;
        tracing::debug!(job_id, "Websocket closed");

        let (prompt_id, report) = tracked?;
        let collected = collect_outputs(&self.http, store, job_id, &prompt_id).await?;
        Ok((report, collected))
    }

    async fn submit_and_track(
        &self,
        channel: &mut C::Channel,
        workflow: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(String, TrackReport), JobError> {
        let response = self
            .http
            .submit_workflow(workflow, self.connector.client_id())
            .await?;

        let prompt_id = match response.prompt_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(JobError::MissingPromptId(format!("{response:?}"))),
        };
        tracing::info!(prompt_id = %prompt_id, queue_number = ?response.number, "Queued workflow");

        let report = track(
            channel,
            &self.connector,
            &self.http,
            &self.config.reconnect,
            &prompt_id,
            cancel,
        )
        .await?;
        Ok((prompt_id, report))
    }
}

/// Merge tracking and collection results into the final outcome.
///
/// Any accumulated error wins over collected images.
pub fn verdict(report: TrackReport, collected: CollectedOutput) -> JobOutcome {
    let mut errors = report.errors;
    errors.extend(collected.errors);

    if !errors.is_empty() {
        return JobOutcome::error_with_details(MSG_JOB_FAILED, errors);
    }
    if collected.images.is_empty() {
        return JobOutcome::no_images();
    }
    JobOutcome::success(collected.images)
}
