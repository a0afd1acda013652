use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub comfy: Comfy,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default)]
    pub azure: Azure,
    #[serde(default)]
    pub bucket: Bucket,
    #[serde(default)]
    pub worker: Worker,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Applies the environment variables the worker image documents. Called
    /// once at startup; no component reads the environment after this.
    pub fn overlay_env(&mut self) {
        overlay_string("COMFY_HOST", &mut self.comfy.host);
        overlay_string("COMFY_OUTPUT_PATH", &mut self.comfy.output_path);
        overlay_u32("COMFY_POLLING_MAX_RETRIES", &mut self.polling.max_attempts);
        overlay_u64("COMFY_POLLING_INTERVAL_MS", &mut self.polling.interval_ms);
        overlay_string("IMAGE_RETURN_METHOD", &mut self.delivery.method);
        overlay_string(
            "AZURE_STORAGE_CONNECTION_STRING",
            &mut self.azure.connection_string,
        );
        overlay_string("AZURE_STORAGE_CONTAINER_NAME", &mut self.azure.container);
        overlay_string("BUCKET_ENDPOINT_URL", &mut self.bucket.endpoint_url);
        if let Ok(raw) = std::env::var("REFRESH_WORKER") {
            self.worker.refresh = raw.eq_ignore_ascii_case("true");
        }
    }

    pub fn azure_configured(&self) -> bool {
        !self.azure.connection_string.trim().is_empty()
    }

    pub fn bucket_configured(&self) -> bool {
        !self.bucket.endpoint_url.trim().is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            comfy: Default::default(),
            availability: Default::default(),
            polling: Default::default(),
            delivery: Default::default(),
            azure: Default::default(),
            bucket: Default::default(),
            worker: Default::default(),
            logging: Default::default(),
        }
    }
}

fn overlay_string(key: &str, slot: &mut String) {
    if let Ok(raw) = std::env::var(key) {
        if !raw.trim().is_empty() {
            *slot = raw;
        }
    }
}

fn overlay_u32(key: &str, slot: &mut u32) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => warn!("ignoring non-numeric {key}={raw}"),
        }
    }
}

fn overlay_u64(key: &str, slot: &mut u64) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => warn!("ignoring non-numeric {key}={raw}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comfy {
    pub host: String,
    pub output_path: String,
}
impl Default for Comfy {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:8188".into(),
            output_path: "/comfyui/output".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub max_attempts: u32,
    pub interval_ms: u64,
}
impl Default for Availability {
    fn default() -> Self {
        Self {
            max_attempts: 500,
            interval_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polling {
    pub max_attempts: u32,
    pub interval_ms: u64,
}
impl Default for Polling {
    fn default() -> Self {
        Self {
            max_attempts: 500,
            interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub method: String,
}
impl Default for Delivery {
    fn default() -> Self {
        Self {
            method: "base64".into(),
        }
    }
}

/// Unrecognized methods fall back to inline encoding rather than failing the
/// job; delivery preference is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
    Azure,
    S3,
    Base64,
}

impl DeliveryMethod {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "azure" => DeliveryMethod::Azure,
            "s3" => DeliveryMethod::S3,
            _ => DeliveryMethod::Base64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Azure {
    pub connection_string: String,
    pub container: String,
}
impl Default for Azure {
    fn default() -> Self {
        Self {
            connection_string: "".into(),
            container: "comfyui-images".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub endpoint_url: String,
}
impl Default for Bucket {
    fn default() -> Self {
        Self {
            endpoint_url: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub refresh: bool,
}
impl Default for Worker {
    fn default() -> Self {
        Self { refresh: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
