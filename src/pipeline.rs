use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

use crate::client::ComfyApi;
use crate::config::Config;
use crate::events::{EventSink, TracingSink};
use crate::input;
use crate::poll::{self, PollError};
use crate::probe;
use crate::report::{JobResult, JobStatus};
use crate::resolve::Resolver;
use crate::stage::{self, UploadOutcome};

/// One job as handed over by the host runtime. Envelopes without an id get
/// a generated one so output keys stay unique.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    #[serde(default = "generated_id")]
    pub id: String,
    #[serde(default)]
    pub input: Value,
}

fn generated_id() -> String {
    Uuid::new_v4().to_string()
}

impl JobEnvelope {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        use anyhow::Context as _;
        serde_json::from_str(raw).with_context(|| "parsing job envelope")
    }
}

/// Terminal pipeline failures, one variant per stage. Display strings are
/// the messages surfaced to the host runtime.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Validation(String),
    #[error("Failed to connect to ComfyUI at {url} after {attempts} attempts")]
    Unavailable { url: String, attempts: u32 },
    #[error("Some images failed to upload")]
    Staging(UploadOutcome),
    #[error("Error queuing workflow: {0:#}")]
    Submission(anyhow::Error),
    #[error("Max retries reached while waiting for image generation")]
    PollTimeout,
    #[error("Error waiting for image generation: {0:#}")]
    PollFetch(anyhow::Error),
}

pub struct Pipeline<C: ComfyApi> {
    cfg: Config,
    api: C,
    sink: Box<dyn EventSink>,
}

impl<C: ComfyApi> Pipeline<C> {
    pub fn new(cfg: &Config, api: C) -> Self {
        Self {
            cfg: cfg.clone(),
            api,
            sink: Box::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    /// Runs one job to completion. Always returns a well-formed result:
    /// stage failures map to their message, panics are contained at this
    /// boundary, and every result carries the configured refresh flag.
    pub fn run_job(&self, job: &JobEnvelope) -> JobResult {
        let refresh = self.cfg.worker.refresh;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.execute(job)));
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(StageError::Staging(outcome))) => JobResult::staging_failure(outcome, refresh),
            Ok(Err(err)) => JobResult::failure(err.to_string(), refresh),
            Err(panic) => JobResult::failure(
                format!("unhandled exception: {}", panic_message(panic.as_ref())),
                refresh,
            ),
        }
    }

    fn execute(&self, job: &JobEnvelope) -> Result<JobResult, StageError> {
        let sink = self.sink.as_ref();

        let input = input::validate(&job.input).map_err(StageError::Validation)?;

        let report = probe::wait_until_ready(
            &self.api,
            self.cfg.availability.max_attempts,
            Duration::from_millis(self.cfg.availability.interval_ms),
            sink,
        );
        if !report.reachable {
            return Err(StageError::Unavailable {
                url: format!("http://{}", self.cfg.comfy.host),
                attempts: report.attempts,
            });
        }

        let outcome = stage::upload_inputs(&self.api, input.images.as_deref(), sink);
        if outcome.status == JobStatus::Error {
            return Err(StageError::Staging(outcome));
        }

        let prompt_id = self
            .api
            .queue_prompt(&input.workflow)
            .map_err(StageError::Submission)?;
        sink.record(
            Level::INFO,
            "submit",
            &format!("queued workflow with ID {prompt_id}"),
        );

        let outputs = poll::await_completion(
            &self.api,
            &prompt_id,
            self.cfg.polling.max_attempts,
            Duration::from_millis(self.cfg.polling.interval_ms),
            sink,
        )
        .map_err(|err| match err {
            PollError::TimedOut { .. } => StageError::PollTimeout,
            PollError::Fetch(source) => StageError::PollFetch(source),
        })?;

        let resolver = Resolver::from_config(&self.cfg, sink);
        Ok(resolver
            .resolve(&outputs, &job.id)
            .into_job_result(self.cfg.worker.refresh))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic".to_string()
    }
}
