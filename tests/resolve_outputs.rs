use anyhow::{Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use comfy_courier::config::Config;
use comfy_courier::events::NullSink;
use comfy_courier::poll::{NodeOutput, OutputImage, Outputs};
use comfy_courier::report::{ImageType, JobStatus, Message};
use comfy_courier::resolve::Resolver;
use comfy_courier::store::ObjectStore;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Object store double: records keys, succeeds with a deterministic URL or
/// fails every put.
struct FakeStore {
    base: &'static str,
    fail: bool,
    puts: Arc<Mutex<Vec<String>>>,
}

impl FakeStore {
    fn working(base: &'static str) -> (Box<dyn ObjectStore>, Arc<Mutex<Vec<String>>>) {
        let puts = Arc::new(Mutex::new(Vec::new()));
        let store = Box::new(FakeStore {
            base,
            fail: false,
            puts: puts.clone(),
        });
        (store, puts)
    }

    fn broken() -> Box<dyn ObjectStore> {
        Box::new(FakeStore {
            base: "",
            fail: true,
            puts: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

impl ObjectStore for FakeStore {
    fn put(&self, key: &str, _path: &Path) -> Result<String> {
        if self.fail {
            bail!("store unavailable");
        }
        self.puts.lock().unwrap().push(key.to_string());
        Ok(format!("{}/{key}", self.base))
    }
}

fn outputs_with(images: Vec<(&str, &str)>) -> Outputs {
    let mut outputs: Outputs = BTreeMap::new();
    outputs.insert(
        "9".to_string(),
        NodeOutput {
            images: images
                .into_iter()
                .map(|(filename, subfolder)| OutputImage {
                    filename: filename.to_string(),
                    subfolder: subfolder.to_string(),
                })
                .collect(),
        },
    );
    outputs
}

fn cfg_with_output(dir: &TempDir, method: &str) -> Config {
    let mut cfg = Config::default();
    cfg.comfy.output_path = dir.path().display().to_string();
    cfg.delivery.method = method.to_string();
    cfg
}

fn write_image(dir: &TempDir, subfolder: &str, filename: &str, bytes: &[u8]) {
    let target = if subfolder.is_empty() {
        dir.path().join(filename)
    } else {
        let sub = dir.path().join(subfolder);
        std::fs::create_dir_all(&sub).unwrap();
        sub.join(filename)
    };
    std::fs::write(target, bytes).unwrap();
}

#[test]
fn bucket_delivery_yields_a_url() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "", "out.png", b"pixels");
    let cfg = cfg_with_output(&dir, "s3");

    let (bucket, puts) = FakeStore::working("http://bucket.example.com");
    let resolver = Resolver::with_stores(&cfg, None, Some(bucket), &NullSink);

    let resolution = resolver.resolve(&outputs_with(vec![("out.png", "")]), "job123");
    assert!(resolution.errors.is_empty());
    assert_eq!(resolution.results.len(), 1);
    assert_eq!(resolution.results[0].node_id, "9");
    assert_eq!(resolution.results[0].image_type, ImageType::Url);
    assert_eq!(
        resolution.results[0].image,
        "http://bucket.example.com/job123/out.png"
    );
    assert_eq!(puts.lock().unwrap().as_slice(), ["job123/out.png"]);

    let result = resolution.into_job_result(false);
    assert_eq!(result.status, JobStatus::Success);
}

#[test]
fn azure_upload_failure_falls_back_to_inline() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "sub", "out.png", b"pixels");
    let cfg = cfg_with_output(&dir, "azure");

    let resolver = Resolver::with_stores(&cfg, Some(FakeStore::broken()), None, &NullSink);
    let resolution = resolver.resolve(&outputs_with(vec![("out.png", "sub")]), "job123");

    assert!(resolution.errors.is_empty());
    assert_eq!(resolution.results[0].image_type, ImageType::Base64);
    assert_eq!(resolution.results[0].image, STANDARD.encode(b"pixels"));
}

#[test]
fn azure_upload_failure_falls_back_to_bucket_when_configured() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "", "out.png", b"pixels");
    let cfg = cfg_with_output(&dir, "azure");

    let (bucket, puts) = FakeStore::working("http://bucket.example.com");
    let resolver = Resolver::with_stores(&cfg, Some(FakeStore::broken()), Some(bucket), &NullSink);
    let resolution = resolver.resolve(&outputs_with(vec![("out.png", "")]), "job123");

    assert_eq!(resolution.results[0].image_type, ImageType::Url);
    assert_eq!(puts.lock().unwrap().len(), 1);
}

#[test]
fn azure_success_uses_the_blob_url() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "", "out.png", b"pixels");
    let cfg = cfg_with_output(&dir, "azure");

    let (azure, puts) = FakeStore::working("https://acct.blob.core.windows.net/comfyui-images");
    let resolver = Resolver::with_stores(&cfg, Some(azure), None, &NullSink);
    let resolution = resolver.resolve(&outputs_with(vec![("out.png", "")]), "job123");

    assert_eq!(resolution.results[0].image_type, ImageType::Url);
    assert_eq!(
        resolution.results[0].image,
        "https://acct.blob.core.windows.net/comfyui-images/job123/out.png"
    );
    assert_eq!(puts.lock().unwrap().as_slice(), ["job123/out.png"]);
}

#[test]
fn store_requested_but_unconfigured_goes_straight_to_inline() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "", "out.png", b"pixels");
    let cfg = cfg_with_output(&dir, "azure");

    // No azure store: the chain must not touch the bucket either.
    let (bucket, puts) = FakeStore::working("http://bucket.example.com");
    let resolver = Resolver::with_stores(&cfg, None, Some(bucket), &NullSink);
    let resolution = resolver.resolve(&outputs_with(vec![("out.png", "")]), "job123");

    assert_eq!(resolution.results[0].image_type, ImageType::Base64);
    assert!(puts.lock().unwrap().is_empty());
}

#[test]
fn default_method_encodes_inline() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "", "out.png", b"pixels");
    let cfg = cfg_with_output(&dir, "base64");

    let resolver = Resolver::with_stores(&cfg, None, None, &NullSink);
    let resolution = resolver.resolve(&outputs_with(vec![("out.png", "")]), "job123");

    assert_eq!(resolution.results[0].image_type, ImageType::Base64);
    assert_eq!(resolution.results[0].image, STANDARD.encode(b"pixels"));
}

#[test]
fn missing_file_is_an_error_and_flips_status_when_alone() {
    let dir = TempDir::new().unwrap();
    let cfg = cfg_with_output(&dir, "base64");

    let resolver = Resolver::with_stores(&cfg, None, None, &NullSink);
    let resolution = resolver.resolve(&outputs_with(vec![("gone.png", "")]), "job123");

    assert!(resolution.results.is_empty());
    assert_eq!(resolution.errors.len(), 1);
    assert_eq!(resolution.errors[0].node_id, "9");
    assert!(
        resolution.errors[0]
            .error
            .starts_with("Image does not exist in the specified output folder:")
    );

    let result = resolution.into_job_result(false);
    assert_eq!(result.status, JobStatus::Error);
    assert_eq!(
        result.message,
        Message::Text("No images were successfully generated or found".to_string())
    );
}

#[test]
fn one_missing_file_does_not_flip_a_batch_with_successes() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "", "ok.png", b"pixels");
    let cfg = cfg_with_output(&dir, "base64");

    let resolver = Resolver::with_stores(&cfg, None, None, &NullSink);
    let resolution = resolver.resolve(&outputs_with(vec![("ok.png", ""), ("gone.png", "")]), "j");

    assert_eq!(resolution.results.len(), 1);
    assert_eq!(resolution.errors.len(), 1);
    let result = resolution.into_job_result(false);
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.errors.len(), 1);
}

#[test]
fn bucket_failure_is_a_per_image_error() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "", "out.png", b"pixels");
    let cfg = cfg_with_output(&dir, "s3");

    let resolver = Resolver::with_stores(&cfg, None, Some(FakeStore::broken()), &NullSink);
    let resolution = resolver.resolve(&outputs_with(vec![("out.png", "")]), "job123");

    assert!(resolution.results.is_empty());
    assert_eq!(resolution.errors.len(), 1);
    assert!(resolution.errors[0].error.contains("store unavailable"));
}

#[test]
fn resolving_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "", "a.png", b"a");
    write_image(&dir, "", "b.png", b"b");
    let cfg = cfg_with_output(&dir, "base64");

    let outputs = outputs_with(vec![("a.png", ""), ("missing.png", ""), ("b.png", "")]);
    let resolver = Resolver::with_stores(&cfg, None, None, &NullSink);

    let first = resolver.resolve(&outputs, "job123");
    let second = resolver.resolve(&outputs, "job123");
    assert_eq!(first, second);
}
