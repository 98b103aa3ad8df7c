//! Artifact output modes.
//!
//! Each fetched artifact is turned into the string placed under the
//! `image` key of the result: a presigned object-storage URL when a
//! bucket is configured, otherwise the base64-encoded bytes.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::config::BucketConfig;

/// Lifetime of presigned artifact URLs.
pub const PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid bucket configuration: {0}")]
    Config(String),

    #[error("Bucket upload failed: {0}")]
    Upload(String),

    #[error("Failed to presign artifact URL: {0}")]
    Presign(String),
}

/// Where artifact bytes end up.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Short name for logs.
    fn mode(&self) -> &'static str;

    /// Persist one artifact and return its representation in the result.
    async fn store(&self, job_id: &str, bytes: Vec<u8>) -> Result<String, StorageError>;
}

/// Inline base64 output.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineStore;

#[async_trait]
impl ArtifactStore for InlineStore {
    fn mode(&self) -> &'static str {
        "inline"
    }

    async fn store(&self, _job_id: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// S3-compatible bucket output.
pub struct BucketStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl BucketStore {
    /// Build an S3 client for the configured endpoint.
    ///
    /// Explicit access keys take precedence; without them the SDK's
    /// default credential chain is used.
    pub async fn connect(config: &BucketConfig) -> Result<Self, StorageError> {
        let (bucket, endpoint) = match &config.bucket_name {
            Some(name) => (name.clone(), config.endpoint_url.clone()),
            None => split_bucket_endpoint(&config.endpoint_url)?,
        };

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(endpoint.clone());

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "bucket-env",
            ));
        }

        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(bucket = %bucket, endpoint = %endpoint, "Artifacts will be uploaded to bucket");

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket,
        })
    }
}

#[async_trait]
impl ArtifactStore for BucketStore {
    fn mode(&self) -> &'static str {
        "bucket"
    }

    async fn store(&self, job_id: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let key = object_key(job_id, Utc::now(), &uuid::Uuid::new_v4().to_string());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("image/png")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload(aws_sdk_s3::error::DisplayErrorContext(e).to_string()))?;

        let presigning =
            PresigningConfig::expires_in(PRESIGN_TTL).map_err(|e| StorageError::Presign(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign(aws_sdk_s3::error::DisplayErrorContext(e).to_string()))?;

        tracing::debug!(job_id, key = %key, "Uploaded artifact to bucket");
        Ok(request.uri().to_string())
    }
}

/// Pick the output mode from configuration.
pub async fn store_from_config(
    bucket: Option<&BucketConfig>,
) -> Result<Box<dyn ArtifactStore>, StorageError> {
    match bucket {
        Some(config) => Ok(Box::new(BucketStore::connect(config).await?)),
        None => Ok(Box::new(InlineStore)),
    }
}

/// Object key `{MM-YY}/{job_id}/{name}.png`.
pub fn object_key(job_id: &str, now: DateTime<Utc>, name: &str) -> String {
    format!("{}/{}/{}.png", now.format("%m-%y"), job_id, name)
}

/// Split a virtual-hosted endpoint such as
/// `https://my-bucket.s3.us-east-1.amazonaws.com` into the bucket name
/// and the service endpoint.
pub fn split_bucket_endpoint(endpoint_url: &str) -> Result<(String, String), StorageError> {
    let mut url = reqwest::Url::parse(endpoint_url)
        .map_err(|e| StorageError::Config(format!("{endpoint_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::Config(format!("{endpoint_url}: missing host")))?
        .to_string();

    let (bucket, rest) = host.split_once('.').ok_or_else(|| {
        StorageError::Config(format!(
            "{endpoint_url}: cannot derive bucket name, set BUCKET_NAME"
        ))
    })?;

    url.set_host(Some(rest))
        .map_err(|e| StorageError::Config(format!("{endpoint_url}: {e}")))?;
    let endpoint = url.as_str().trim_end_matches('/').to_string();
    Ok((bucket.to_string(), endpoint))
}
