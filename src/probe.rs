use std::time::Duration;
use tracing::Level;

use crate::client::ComfyApi;
use crate::events::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub reachable: bool,
    pub attempts: u32,
}

/// Polls the generation service's health endpoint until it answers 200 or
/// the attempt budget runs out. Transport errors and non-200 responses are
/// swallowed; the service is expected to flap while it boots. Never fails —
/// the orchestrator checks the returned flag.
pub fn wait_until_ready(
    api: &dyn ComfyApi,
    max_attempts: u32,
    interval: Duration,
    sink: &dyn EventSink,
) -> ProbeReport {
    for attempt in 1..=max_attempts {
        match api.health() {
            Ok(200) => {
                sink.record(
                    Level::INFO,
                    "probe",
                    &format!("API is reachable after {attempt} attempts"),
                );
                return ProbeReport {
                    reachable: true,
                    attempts: attempt,
                };
            }
            Ok(_) | Err(_) => {}
        }
        std::thread::sleep(interval);
    }

    sink.record(
        Level::WARN,
        "probe",
        &format!("failed to connect after {max_attempts} attempts"),
    );
    ProbeReport {
        reachable: false,
        attempts: max_attempts,
    }
}
