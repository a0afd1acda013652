use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::multipart::{Form, Part};
use serde_json::Value;

/// The generation service's fixed HTTP surface. The trait is the seam the
/// pipeline is tested through; `HttpComfy` is the only production
/// implementation.
pub trait ComfyApi {
    /// GET `/`. Returns the status code; transport failures are errors.
    fn health(&self) -> Result<u16>;

    /// POST `/upload/image` as multipart with the overwrite flag forced on.
    fn upload_image(&self, name: &str, bytes: Vec<u8>) -> Result<()>;

    /// POST `/prompt` with the workflow wrapped under the required `prompt`
    /// key; returns the correlation id.
    fn queue_prompt(&self, workflow: &Value) -> Result<String>;

    /// GET `/history/{prompt_id}`, parsed as JSON.
    fn history(&self, prompt_id: &str) -> Result<Value>;
}

pub struct HttpComfy {
    base: String,
    http: reqwest::blocking::Client,
}

impl HttpComfy {
    pub fn new(host: &str) -> Self {
        Self {
            base: format!("http://{host}"),
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl ComfyApi for HttpComfy {
    fn health(&self) -> Result<u16> {
        let resp = self
            .http
            .get(&self.base)
            .send()
            .with_context(|| format!("health probe: {}", self.base))?;
        Ok(resp.status().as_u16())
    }

    fn upload_image(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("image/png")
            .with_context(|| "building multipart image part")?;
        let form = Form::new().part("image", part).text("overwrite", "true");

        let resp = self
            .http
            .post(format!("{}/upload/image", self.base))
            .multipart(form)
            .send()
            .with_context(|| "posting image upload")?;

        let status = resp.status();
        if status.as_u16() != 200 {
            let body = resp.text().unwrap_or_default();
            bail!("upload returned {}: {}", status, body.trim());
        }
        Ok(())
    }

    fn queue_prompt(&self, workflow: &Value) -> Result<String> {
        let body = serde_json::json!({ "prompt": workflow });
        let resp = self
            .http
            .post(format!("{}/prompt", self.base))
            .json(&body)
            .send()
            .with_context(|| "posting workflow")?;

        let reply: Value = resp.json().with_context(|| "parsing queue response")?;
        let prompt_id = reply
            .get("prompt_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("queue response missing prompt_id: {reply}"))?;
        Ok(prompt_id.to_string())
    }

    fn history(&self, prompt_id: &str) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/history/{}", self.base, prompt_id))
            .send()
            .with_context(|| "fetching history")?;
        resp.json().with_context(|| "parsing history response")
    }
}
