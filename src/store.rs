use anyhow::{Context, Result, bail};
use std::cell::Cell;
use std::path::Path;

/// Opaque "store bytes, get a URL back" collaborator. Implementations own
/// their own transport and credential handling.
pub trait ObjectStore {
    fn put(&self, key: &str, path: &Path) -> Result<String>;
}

/// Azure Blob Storage over its REST surface. The connection string is
/// parsed on every put so a malformed one surfaces as an upload failure,
/// which the resolver treats as a soft miss, the same as a rejected upload.
pub struct AzureBlobStore {
    connection_string: String,
    container: String,
    http: reqwest::blocking::Client,
    container_ready: Cell<bool>,
}

impl AzureBlobStore {
    pub fn new(connection_string: &str, container: &str) -> Self {
        Self {
            connection_string: connection_string.to_string(),
            container: container.to_string(),
            http: reqwest::blocking::Client::new(),
            container_ready: Cell::new(false),
        }
    }

    fn ensure_container(&self, endpoint: &AzureEndpoint) -> Result<()> {
        if self.container_ready.get() {
            return Ok(());
        }

        let url = endpoint.container_url(&self.container, "restype=container");
        let resp = self
            .http
            .put(&url)
            .header("x-ms-version", "2021-08-06")
            .header("content-length", "0")
            .send()
            .with_context(|| "creating blob container")?;

        // 409 means the container already exists.
        let status = resp.status().as_u16();
        if status != 201 && status != 409 {
            let body = resp.text().unwrap_or_default();
            bail!("container create returned {status}: {}", body.trim());
        }

        self.container_ready.set(true);
        Ok(())
    }
}

impl ObjectStore for AzureBlobStore {
    fn put(&self, key: &str, path: &Path) -> Result<String> {
        let endpoint = AzureEndpoint::parse(&self.connection_string)?;
        self.ensure_container(&endpoint)?;

        let bytes = std::fs::read(path)
            .with_context(|| format!("reading image: {}", path.display()))?;

        let blob_url = endpoint.blob_url(&self.container, key, false);
        let upload_url = endpoint.blob_url(&self.container, key, true);
        let resp = self
            .http
            .put(&upload_url)
            .header("x-ms-version", "2021-08-06")
            .header("x-ms-blob-type", "BlockBlob")
            .header("content-type", "image/png")
            .body(bytes)
            .send()
            .with_context(|| "uploading blob")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            bail!("blob upload returned {status}: {}", body.trim());
        }
        Ok(blob_url)
    }
}

struct AzureEndpoint {
    base: String,
    sas: Option<String>,
}

impl AzureEndpoint {
    /// Accepts the `Key=Value;...` connection-string format. The blob
    /// endpoint comes from `BlobEndpoint` when present, otherwise from
    /// `AccountName` + `EndpointSuffix`. A `SharedAccessSignature` segment
    /// is appended to request URLs; other credential schemes are the
    /// storage account's concern.
    fn parse(raw: &str) -> Result<Self> {
        let mut account_name = None;
        let mut endpoint_suffix = "core.windows.net".to_string();
        let mut blob_endpoint = None;
        let mut sas = None;

        for segment in raw.split(';') {
            let Some((k, v)) = segment.split_once('=') else {
                continue;
            };
            match k.trim() {
                "AccountName" => account_name = Some(v.trim().to_string()),
                "EndpointSuffix" => endpoint_suffix = v.trim().to_string(),
                "BlobEndpoint" => blob_endpoint = Some(v.trim().trim_end_matches('/').to_string()),
                "SharedAccessSignature" => sas = Some(v.trim().trim_start_matches('?').to_string()),
                _ => {}
            }
        }

        let base = match (blob_endpoint, account_name) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => format!("https://{account}.blob.{endpoint_suffix}"),
            (None, None) => {
                bail!("connection string has neither BlobEndpoint nor AccountName")
            }
        };

        Ok(Self { base, sas })
    }

    fn container_url(&self, container: &str, query: &str) -> String {
        match &self.sas {
            Some(sas) => format!("{}/{container}?{query}&{sas}", self.base),
            None => format!("{}/{container}?{query}", self.base),
        }
    }

    fn blob_url(&self, container: &str, key: &str, signed: bool) -> String {
        let url = format!("{}/{container}/{key}", self.base);
        match &self.sas {
            Some(sas) if signed => format!("{url}?{sas}"),
            _ => url,
        }
    }
}

/// S3-style bucket behind a plain HTTP endpoint: PUT the bytes under the
/// key, the object URL is the result.
pub struct BucketStore {
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl BucketStore {
    pub fn new(endpoint_url: &str) -> Self {
        Self {
            endpoint: endpoint_url.trim_end_matches('/').to_string(),
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl ObjectStore for BucketStore {
    fn put(&self, key: &str, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading image: {}", path.display()))?;

        let url = format!("{}/{key}", self.endpoint);
        let resp = self
            .http
            .put(&url)
            .header("content-type", "image/png")
            .body(bytes)
            .send()
            .with_context(|| "uploading to bucket")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            bail!("bucket upload returned {status}: {}", body.trim());
        }
        Ok(url)
    }
}
