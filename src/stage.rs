use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::Level;

use crate::client::ComfyApi;
use crate::events::EventSink;
use crate::input::InputImage;
use crate::report::JobStatus;

/// Aggregate result of staging the job's input images. `status == Error`
/// iff `failures` is non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub status: JobStatus,
    pub uploaded: Vec<String>,
    pub failures: Vec<String>,
}

impl UploadOutcome {
    fn empty_success() -> Self {
        Self {
            status: JobStatus::Success,
            uploaded: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Pushes each input image to the generation service before submission.
/// Per-image failures (bad payload, upload rejection, transport error) are
/// recorded and do not stop the remaining images; the orchestrator decides
/// what a partial failure means for the job.
pub fn upload_inputs(
    api: &dyn ComfyApi,
    images: Option<&[InputImage]>,
    sink: &dyn EventSink,
) -> UploadOutcome {
    let Some(images) = images.filter(|entries| !entries.is_empty()) else {
        return UploadOutcome::empty_success();
    };

    sink.record(Level::INFO, "stage", &format!("uploading {} image(s)", images.len()));

    let mut uploaded = Vec::new();
    let mut failures = Vec::new();

    for image in images {
        let bytes = match STANDARD.decode(&image.image) {
            Ok(bytes) => bytes,
            Err(err) => {
                failures.push(format!(
                    "Error uploading {}: invalid base64 payload: {err}",
                    image.name
                ));
                continue;
            }
        };

        match api.upload_image(&image.name, bytes) {
            Ok(()) => uploaded.push(format!("Successfully uploaded {}", image.name)),
            Err(err) => failures.push(format!("Error uploading {}: {err:#}", image.name)),
        }
    }

    let status = if failures.is_empty() {
        sink.record(Level::INFO, "stage", "image(s) upload complete");
        JobStatus::Success
    } else {
        sink.record(Level::WARN, "stage", "image(s) upload finished with errors");
        JobStatus::Error
    };

    UploadOutcome {
        status,
        uploaded,
        failures,
    }
}
