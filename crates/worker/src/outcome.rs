//! Job result envelope.

use serde::Serialize;

/// Status reported when a job finished cleanly without any image.
pub const STATUS_SUCCESS_NO_IMAGES: &str = "success_no_images";

const MSG_NO_IMAGES: &str = "Workflow completed but no output images were generated.";

/// One output artifact: a URL or base64 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageOutput {
    pub image: String,
}

/// Final verdict of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Success {
        images: Vec<ImageOutput>,
    },
    NoImages {
        status: &'static str,
        message: String,
    },
    Failure {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Vec<String>>,
    },
}

impl JobOutcome {
    pub fn success(images: Vec<String>) -> Self {
        Self::Success {
            images: images.into_iter().map(|image| ImageOutput { image }).collect(),
        }
    }

    pub fn no_images() -> Self {
        Self::NoImages {
            status: STATUS_SUCCESS_NO_IMAGES,
            message: MSG_NO_IMAGES.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Failure {
            error: message.into(),
            details: None,
        }
    }

    pub fn error_with_details(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Failure {
            error: message.into(),
            details: Some(details),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// What the worker prints for a job.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    #[serde(flatten)]
    pub outcome: JobOutcome,
    /// Ask the host to recycle this worker.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub refresh_worker: bool,
}
