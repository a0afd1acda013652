use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::Level;

use crate::client::ComfyApi;
use crate::events::EventSink;

/// Completed outputs keyed by node id. BTreeMap keeps resolution order
/// deterministic across runs.
pub type Outputs = BTreeMap<String, NodeOutput>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Max retries reached while waiting for image generation")]
    TimedOut { attempts: u32 },
    #[error(transparent)]
    Fetch(#[from] anyhow::Error),
}

/// Fetches history for `prompt_id` until the record carries a non-empty
/// `outputs` field. Unlike the availability prober, fetch errors propagate
/// immediately: once the service has accepted a workflow, a failing history
/// endpoint is not expected to recover.
pub fn await_completion(
    api: &dyn ComfyApi,
    prompt_id: &str,
    max_attempts: u32,
    interval: Duration,
    sink: &dyn EventSink,
) -> Result<Outputs, PollError> {
    for attempt in 1..=max_attempts {
        let history = api.history(prompt_id)?;

        if let Some(outputs) = completed_outputs(&history, prompt_id)? {
            sink.record(
                Level::INFO,
                "poll",
                &format!("generation complete after {attempt} poll(s)"),
            );
            return Ok(outputs);
        }

        std::thread::sleep(interval);
    }

    Err(PollError::TimedOut {
        attempts: max_attempts,
    })
}

/// Absence of the record or of `outputs` means "not yet complete", not an
/// error. An empty `outputs` object also counts as incomplete.
fn completed_outputs(history: &Value, prompt_id: &str) -> Result<Option<Outputs>, PollError> {
    let Some(outputs) = history.get(prompt_id).and_then(|record| record.get("outputs")) else {
        return Ok(None);
    };
    match outputs.as_object() {
        Some(nodes) if !nodes.is_empty() => {
            let parsed: Outputs = serde_json::from_value(outputs.clone())
                .with_context(|| "parsing history outputs")?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}
