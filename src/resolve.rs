use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};
use tracing::Level;

use crate::config::{Config, DeliveryMethod};
use crate::events::EventSink;
use crate::poll::Outputs;
use crate::report::{ImageError, ImageResult, ImageType, JobResult, JobStatus, Message};
use crate::store::{AzureBlobStore, BucketStore, ObjectStore};

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub results: Vec<ImageResult>,
    pub errors: Vec<ImageError>,
}

impl Resolution {
    /// Success iff at least one image was resolved; individual errors ride
    /// along without flipping the status.
    pub fn into_job_result(self, refresh_worker: bool) -> JobResult {
        if self.results.is_empty() {
            JobResult {
                status: JobStatus::Error,
                message: Message::Text(
                    "No images were successfully generated or found".to_string(),
                ),
                errors: self.errors,
                details: Vec::new(),
                refresh_worker,
            }
        } else {
            JobResult {
                status: JobStatus::Success,
                message: Message::Images(self.results),
                errors: self.errors,
                details: Vec::new(),
                refresh_worker,
            }
        }
    }
}

/// One step of the delivery chain. The chain is data: precondition checks
/// happen when it is built, the steps run in order, first success wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Azure,
    Bucket,
    Inline,
}

fn delivery_chain(method: DeliveryMethod, azure: bool, bucket: bool) -> Vec<Step> {
    match method {
        DeliveryMethod::Azure if azure => {
            if bucket {
                vec![Step::Azure, Step::Bucket]
            } else {
                vec![Step::Azure, Step::Inline]
            }
        }
        DeliveryMethod::S3 if bucket => vec![Step::Bucket],
        // A store was requested but never configured: skip straight to
        // inline encoding without attempting any upload.
        DeliveryMethod::Azure | DeliveryMethod::S3 => vec![Step::Inline],
        DeliveryMethod::Base64 => vec![Step::Inline],
    }
}

pub struct Resolver<'a> {
    output_base: PathBuf,
    chain: Vec<Step>,
    azure: Option<Box<dyn ObjectStore>>,
    bucket: Option<Box<dyn ObjectStore>>,
    sink: &'a dyn EventSink,
}

impl<'a> Resolver<'a> {
    pub fn from_config(cfg: &Config, sink: &'a dyn EventSink) -> Self {
        let azure: Option<Box<dyn ObjectStore>> = cfg.azure_configured().then(|| {
            Box::new(AzureBlobStore::new(
                &cfg.azure.connection_string,
                &cfg.azure.container,
            )) as Box<dyn ObjectStore>
        });
        let bucket: Option<Box<dyn ObjectStore>> = cfg
            .bucket_configured()
            .then(|| Box::new(BucketStore::new(&cfg.bucket.endpoint_url)) as Box<dyn ObjectStore>);
        Self::with_stores(cfg, azure, bucket, sink)
    }

    /// Store injection point for tests and alternative backends.
    pub fn with_stores(
        cfg: &Config,
        azure: Option<Box<dyn ObjectStore>>,
        bucket: Option<Box<dyn ObjectStore>>,
        sink: &'a dyn EventSink,
    ) -> Self {
        let chain = delivery_chain(
            DeliveryMethod::parse(&cfg.delivery.method),
            azure.is_some(),
            bucket.is_some(),
        );
        Self {
            output_base: PathBuf::from(&cfg.comfy.output_path),
            chain,
            azure,
            bucket,
            sink,
        }
    }

    /// Walks every image of every node. Missing files and per-image
    /// delivery failures become `ImageError`s; the batch keeps going.
    pub fn resolve(&self, outputs: &Outputs, job_id: &str) -> Resolution {
        let mut results = Vec::new();
        let mut errors = Vec::new();

        for (node_id, node) in outputs {
            for image in &node.images {
                let local = if image.subfolder.is_empty() {
                    self.output_base.join(&image.filename)
                } else {
                    self.output_base.join(&image.subfolder).join(&image.filename)
                };

                self.sink.record(
                    Level::DEBUG,
                    "resolve",
                    &format!("processing: {}", local.display()),
                );

                if !local.exists() {
                    errors.push(ImageError {
                        node_id: node_id.clone(),
                        error: format!(
                            "Image does not exist in the specified output folder: {}",
                            local.display()
                        ),
                    });
                    continue;
                }

                match self.deliver(&local, job_id, node_id) {
                    Ok(result) => results.push(result),
                    Err(err) => errors.push(ImageError {
                        node_id: node_id.clone(),
                        error: format!("{err:#}"),
                    }),
                }
            }
        }

        Resolution { results, errors }
    }

    fn deliver(&self, local: &Path, job_id: &str, node_id: &str) -> Result<ImageResult> {
        for step in &self.chain {
            match step {
                Step::Azure => {
                    let Some(store) = &self.azure else { continue };
                    // An azure miss is soft: fall through to the next step.
                    match store.put(&object_key(job_id, local), local) {
                        Ok(url) => {
                            self.sink.record(
                                Level::INFO,
                                "resolve",
                                &format!("image from node {node_id} uploaded to Azure Blob Storage"),
                            );
                            return Ok(url_result(node_id, url));
                        }
                        Err(err) => self.sink.record(
                            Level::WARN,
                            "resolve",
                            &format!("Azure upload failed, falling back: {err:#}"),
                        ),
                    }
                }
                Step::Bucket => {
                    let Some(store) = &self.bucket else { continue };
                    let url = store.put(&object_key(job_id, local), local)?;
                    self.sink.record(
                        Level::INFO,
                        "resolve",
                        &format!("image from node {node_id} uploaded to bucket"),
                    );
                    return Ok(url_result(node_id, url));
                }
                Step::Inline => {
                    let bytes = std::fs::read(local)
                        .with_context(|| format!("reading image: {}", local.display()))?;
                    return Ok(ImageResult {
                        node_id: node_id.to_string(),
                        image_type: ImageType::Base64,
                        image: STANDARD.encode(bytes),
                    });
                }
            }
        }
        Err(anyhow!("delivery chain exhausted without producing an image"))
    }
}

fn url_result(node_id: &str, url: String) -> ImageResult {
    ImageResult {
        node_id: node_id.to_string(),
        image_type: ImageType::Url,
        image: url,
    }
}

fn object_key(job_id: &str, local: &Path) -> String {
    let file_name = local
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{job_id}/{file_name}")
}
