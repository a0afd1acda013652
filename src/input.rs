use serde_json::Value;

/// One staged input image: a target filename and its base64 payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InputImage {
    pub name: String,
    pub image: String,
}

/// Job payload after validation. `images: None` (absent) is distinct from an
/// empty list.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    pub workflow: Value,
    pub images: Option<Vec<InputImage>>,
}

const IMAGES_SHAPE_ERROR: &str =
    "'images' must be a list of objects with 'name' and 'image' keys";

/// Normalizes and checks the raw job payload. The error string is the
/// message surfaced verbatim to the host runtime. Pure; no I/O.
pub fn validate(raw: &Value) -> Result<JobInput, String> {
    if raw.is_null() {
        return Err("Please provide input".to_string());
    }

    // String payloads are parsed and then treated like structured ones.
    let parsed;
    let payload = match raw {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text)
                .map_err(|_| "Invalid JSON format in input".to_string())?;
            &parsed
        }
        other => other,
    };

    let workflow = match payload.get("workflow") {
        Some(w) if !w.is_null() => w.clone(),
        _ => return Err("Missing 'workflow' parameter".to_string()),
    };

    let images = match payload.get("images") {
        None | Some(Value::Null) => None,
        Some(Value::Array(entries)) => {
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                let (name, image) = match (
                    entry.get("name").and_then(Value::as_str),
                    entry.get("image").and_then(Value::as_str),
                ) {
                    (Some(name), Some(image)) => (name, image),
                    _ => return Err(IMAGES_SHAPE_ERROR.to_string()),
                };
                out.push(InputImage {
                    name: name.to_string(),
                    image: image.to_string(),
                });
            }
            Some(out)
        }
        Some(_) => return Err(IMAGES_SHAPE_ERROR.to_string()),
    };

    Ok(JobInput { workflow, images })
}
