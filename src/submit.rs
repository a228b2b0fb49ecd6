use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::ProviderApi;
use crate::error::RelayError;
use crate::task::normalize;
use crate::task::store::{Seeded, TaskStore};
use crate::task::{GenerationMode, TaskRecord};

/// Reference subject for subject-reference mode.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SubjectReference {
    #[serde(rename = "type", default = "default_subject_type")]
    pub kind: String,
    #[serde(default)]
    pub image: Vec<String>,
}

impl SubjectReference {
    /// Provider shape: `{"type": ..., "image": [...]}`.
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), Value::from(self.kind.as_str()));
        map.insert("image".into(), Value::from(self.image.clone()));
        Value::Object(map)
    }
}

fn default_subject_type() -> String {
    "character".to_string()
}

/// Body of `POST /api/video-generation`.
///
/// Images are either URLs or base64 data URLs; they are forwarded untouched.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GenerationRequest {
    /// Omitted mode means image-to-video.
    #[serde(default)]
    pub mode: Option<GenerationMode>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub prompt_optimizer: Option<bool>,
    #[serde(default)]
    pub fast_pretreatment: Option<bool>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub first_frame_image: Option<String>,
    #[serde(default)]
    pub last_frame_image: Option<String>,
    #[serde(default)]
    pub subject_reference: Option<Vec<SubjectReference>>,
}

impl GenerationRequest {
    pub fn mode_or_default(&self) -> GenerationMode {
        self.mode.unwrap_or_default()
    }
}

/// Treat empty and whitespace-only strings as absent.
fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

/// Check mode-specific required fields. Runs before any provider call.
pub fn validate(req: &GenerationRequest) -> Result<(), RelayError> {
    if present(&req.model).is_none() {
        return Err(RelayError::Validation(
            "Missing required field: model is required".to_string(),
        ));
    }

    let mode = req.mode_or_default();
    let mut missing = Vec::new();
    match mode {
        GenerationMode::TextToVideo => {
            if present(&req.prompt).is_none() {
                missing.push("prompt");
            }
        }
        GenerationMode::ImageToVideo => {
            if present(&req.first_frame_image).is_none() {
                missing.push("first_frame_image");
            }
        }
        GenerationMode::FirstLastFrame => {
            if present(&req.first_frame_image).is_none() {
                missing.push("first_frame_image");
            }
            if present(&req.last_frame_image).is_none() {
                missing.push("last_frame_image");
            }
        }
        GenerationMode::SubjectReference => {
            if !req.subject_reference.as_ref().is_some_and(|s| !s.is_empty()) {
                missing.push("subject_reference array");
            }
        }
    }

    if missing.is_empty() {
        return Ok(());
    }
    let (noun, verb) = if missing.len() == 1 {
        ("field", "is")
    } else {
        ("fields", "are")
    };
    Err(RelayError::Validation(format!(
        "Missing required {noun}: {} {verb} required for {mode} mode",
        missing.join(" and ")
    )))
}

/// Build the provider payload for an already-validated request.
///
/// Image fields are only included for the modes that use them.
pub fn build_payload(req: &GenerationRequest, default_callback_url: Option<&str>) -> Value {
    let mode = req.mode_or_default();
    let mut payload = Map::new();

    if let Some(model) = present(&req.model) {
        payload.insert("model".into(), Value::from(model));
    }
    if let Some(prompt) = present(&req.prompt) {
        payload.insert("prompt".into(), Value::from(prompt));
    }
    if let Some(v) = req.prompt_optimizer {
        payload.insert("prompt_optimizer".into(), Value::from(v));
    }
    if let Some(v) = req.fast_pretreatment {
        payload.insert("fast_pretreatment".into(), Value::from(v));
    }
    if let Some(duration) = req.duration.filter(|d| *d > 0) {
        payload.insert("duration".into(), Value::from(duration));
    }
    if let Some(resolution) = present(&req.resolution) {
        payload.insert("resolution".into(), Value::from(resolution));
    }
    let callback_url = present(&req.callback_url)
        .or(default_callback_url.filter(|s| !s.trim().is_empty()));
    if let Some(url) = callback_url {
        payload.insert("callback_url".into(), Value::from(url));
    }

    if matches!(
        mode,
        GenerationMode::ImageToVideo | GenerationMode::FirstLastFrame
    ) && let Some(image) = present(&req.first_frame_image)
    {
        payload.insert("first_frame_image".into(), Value::from(image));
    }
    if mode == GenerationMode::FirstLastFrame
        && let Some(image) = present(&req.last_frame_image)
    {
        payload.insert("last_frame_image".into(), Value::from(image));
    }
    if mode == GenerationMode::SubjectReference
        && let Some(subjects) = &req.subject_reference
    {
        let subjects = subjects.iter().map(SubjectReference::to_value).collect();
        payload.insert("subject_reference".into(), Value::Array(subjects));
    }

    Value::Object(payload)
}

/// Shorten base64 image fields so payloads can be logged.
pub fn loggable_payload(payload: &Value) -> Value {
    const KEEP: usize = 50;
    let mut copy = payload.clone();
    if let Some(map) = copy.as_object_mut() {
        for key in ["first_frame_image", "last_frame_image"] {
            if let Some(Value::String(s)) = map.get_mut(key)
                && s.chars().count() > KEEP * 2
            {
                let total = s.chars().count();
                let head: String = s.chars().take(KEEP).collect();
                *s = format!("{head}...[{} more chars]", total - KEEP);
            }
        }
        if map.contains_key("subject_reference") {
            map.insert("subject_reference".into(), Value::from("[omitted]"));
        }
    }
    copy
}

pub struct Submitter {
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn ProviderApi>,
    callback_url: Option<String>,
}

impl Submitter {
    pub fn new(store: Arc<dyn TaskStore>, provider: Arc<dyn ProviderApi>) -> Self {
        Self {
            store,
            provider,
            callback_url: None,
        }
    }

    /// Callback URL used when a request does not bring its own.
    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }

    /// Validate, create the provider task and seed the store.
    pub async fn submit(&self, req: &GenerationRequest) -> Result<TaskRecord, RelayError> {
        validate(req)?;
        let mode = req.mode_or_default();
        let payload = build_payload(req, self.callback_url.as_deref());

        tracing::info!(mode = %mode, payload = %loggable_payload(&payload), "creating generation task");

        let raw = self.provider.create_task(&payload).await?;
        normalize::check_base_resp(&raw)?;

        let task_id = raw
            .get("task_id")
            .and_then(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| RelayError::SchemaParse("create response missing task_id".to_string()))?;

        let record = match self.store.seed(&task_id, mode) {
            Seeded::Created(record) => record,
            Seeded::Existing(record) => {
                tracing::info!(task_id = %task_id, status = %record.status, "task already known, callback arrived first");
                record
            }
        };
        tracing::info!(task_id = %task_id, mode = %mode, "generation task created");
        Ok(record)
    }
}
