//! Contract between the pipeline and an image classification service.

use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const API_KEY_MISSING: &str = "API key is not configured.";
pub const API_REQUEST_FAILED: &str = "API request failed.";

/// Outcome for one submitted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub success: bool,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationResult {
    pub fn identified(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            success: true,
            name: name.into(),
            description: description.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            name: String::new(),
            description: String::new(),
            error: Some(error.into()),
        }
    }

    /// One identical failure per image.
    pub fn failed_batch(count: usize, error: &str) -> Vec<Self> {
        (0..count).map(|_| Self::failed(error)).collect()
    }
}

/// Image bytes as sent to the classifier.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Faults raised while calling the classifier. Structured per-image failures
/// are not faults; they come back as `ClassificationResult::failed`, and so
/// does a reply the service sent but the client could not make sense of.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to read {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// A classification service. Given a batch, returns one result per image in
/// submission order; anything else is the caller's problem to detect.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, images: &[ImagePayload]) -> Result<Vec<ClassificationResult>, GatewayError>;
}
