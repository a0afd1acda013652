use serde::{Deserialize, Serialize};

use crate::stage::UploadOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Url,
    Base64,
}

/// One delivered output image. Field casing follows the wire format the
/// host runtime consumes ("node_id" next to "imageType").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub node_id: String,
    #[serde(rename = "imageType")]
    pub image_type: ImageType,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageError {
    pub node_id: String,
    pub error: String,
}

/// The `message` field carries the image list on success and a plain
/// description on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Images(Vec<ImageResult>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ImageError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    pub refresh_worker: bool,
}

impl JobResult {
    pub fn failure(message: impl Into<String>, refresh_worker: bool) -> Self {
        Self {
            status: JobStatus::Error,
            message: Message::Text(message.into()),
            errors: Vec::new(),
            details: Vec::new(),
            refresh_worker,
        }
    }

    pub fn staging_failure(outcome: UploadOutcome, refresh_worker: bool) -> Self {
        Self {
            status: JobStatus::Error,
            message: Message::Text("Some images failed to upload".to_string()),
            errors: Vec::new(),
            details: outcome.failures,
            refresh_worker,
        }
    }
}
