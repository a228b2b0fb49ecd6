use serde_json::{Map, Value};

use crate::error::RelayError;
use crate::task::{Dimensions, TaskStatus, TaskUpdate, VideoLocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    Url,
    FileId,
}

/// One accessor in an ordered fallback chain: a JSON path and what it yields.
#[derive(Debug, Clone, Copy)]
pub struct LocatorRule {
    pub path: &'static [&'static str],
    pub kind: LocatorKind,
}

const fn url(path: &'static [&'static str]) -> LocatorRule {
    LocatorRule {
        path,
        kind: LocatorKind::Url,
    }
}

const fn file_id(path: &'static [&'static str]) -> LocatorRule {
    LocatorRule {
        path,
        kind: LocatorKind::FileId,
    }
}

/// Status queries and callbacks. First match wins.
pub const STATUS_LOCATOR_RULES: &[LocatorRule] = &[
    url(&["file_url"]),
    url(&["download_url"]),
    url(&["url"]),
    url(&["video_url"]),
    url(&["file", "download_url"]),
    file_id(&["file_id"]),
];

/// File retrieval responses nest the URL under `file`.
pub const FILE_LOCATOR_RULES: &[LocatorRule] = &[
    url(&["file", "download_url"]),
    url(&["download_url"]),
    url(&["url"]),
    url(&["file_url"]),
    url(&["video_url"]),
];

const DIMENSION_FIELDS: &[(&str, &str)] = &[("video_width", "video_height"), ("width", "height")];

/// Result of normalizing one raw provider payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub task_id: Option<String>,
    pub status: TaskStatus,
    pub video_locator: Option<VideoLocator>,
    pub dimensions: Option<Dimensions>,
    pub raw: Map<String, Value>,
}

impl Normalized {
    pub fn into_update(self) -> TaskUpdate {
        TaskUpdate {
            status: Some(self.status),
            video_locator: self.video_locator,
            dimensions: self.dimensions,
            raw_provider_fields: Some(self.raw),
        }
    }
}

pub fn normalize(raw: &Value) -> Normalized {
    Normalized {
        task_id: raw.get("task_id").and_then(scalar_string),
        status: parse_status(raw.get("status").and_then(Value::as_str)),
        video_locator: extract_locator(raw, STATUS_LOCATOR_RULES),
        dimensions: extract_dimensions(raw),
        raw: raw.as_object().cloned().unwrap_or_default(),
    }
}

/// Case-folded provider status to canonical status.
///
/// Unknown values map to `Processing` so a new provider state can never be
/// mistaken for a terminal one.
pub fn parse_status(status: Option<&str>) -> TaskStatus {
    let Some(status) = status else {
        return TaskStatus::Processing;
    };
    match status.trim().to_ascii_lowercase().as_str() {
        "success" | "succeeded" => TaskStatus::Succeeded,
        "fail" | "failed" => TaskStatus::Failed,
        "queueing" | "queued" => TaskStatus::Queued,
        "preparing" => TaskStatus::Preparing,
        "processing" => TaskStatus::Processing,
        other => {
            tracing::debug!(status = other, "unrecognised provider status, treating as processing");
            TaskStatus::Processing
        }
    }
}

/// Walk `rules` in order and return the first non-empty match.
pub fn extract_locator(raw: &Value, rules: &[LocatorRule]) -> Option<VideoLocator> {
    rules.iter().find_map(|rule| {
        let value = rule.path.iter().try_fold(raw, |v, key| v.get(key))?;
        let text = scalar_string(value)?;
        Some(match rule.kind {
            LocatorKind::Url => VideoLocator::Url(text),
            LocatorKind::FileId => VideoLocator::FileId(text),
        })
    })
}

pub fn extract_dimensions(raw: &Value) -> Option<Dimensions> {
    DIMENSION_FIELDS.iter().find_map(|(w, h)| {
        let width = raw.get(*w).and_then(as_u32)?;
        let height = raw.get(*h).and_then(as_u32)?;
        Some(Dimensions { width, height })
    })
}

/// Fail with `ProviderApplication` when `base_resp.status_code` is non-zero.
/// A missing `base_resp` is treated as success.
pub fn check_base_resp(raw: &Value) -> Result<(), RelayError> {
    let Some(base) = raw.get("base_resp") else {
        return Ok(());
    };
    let code = base.get("status_code").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        return Ok(());
    }
    let message = base
        .get("status_msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Err(RelayError::ProviderApplication { code, message })
}

/// Non-empty string, or a number rendered as a string (file ids arrive as both).
fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
