use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RelayError;
use crate::reconcile::CallbackAck;
use crate::server::AppState;
use crate::storage::VideoSink;
use crate::submit::GenerationRequest;
use crate::task::{TaskRecord, VideoLocator};

/// Canonical record plus the flat legacy fields older clients read.
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub file_id: Option<String>,
    pub file_url: Option<String>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub base_resp: Value,
}

impl From<TaskRecord> for TaskView {
    fn from(record: TaskRecord) -> Self {
        let file_id = match &record.video_locator {
            Some(VideoLocator::FileId(id)) => Some(id.clone()),
            _ => record
                .raw_provider_fields
                .get("file_id")
                .and_then(|v| match v {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
        };
        let base_resp = record
            .raw_provider_fields
            .get("base_resp")
            .cloned()
            .unwrap_or_else(|| json!({"status_code": 0, "status_msg": "success"}));
        Self {
            file_id,
            file_url: record.video_url().map(str::to_string),
            video_width: record.dimensions.map(|d| d.width),
            video_height: record.dimensions.map(|d| d.height),
            base_resp,
            record,
        }
    }
}

pub async fn create_generation(
    State(state): State<AppState>,
    Json(req): Json<GenerationRequest>,
) -> Result<Json<TaskView>, RelayError> {
    let record = state.submitter.submit(&req).await?;
    if !record.is_terminal() {
        state.track(&record.task_id);
    }
    Ok(Json(record.into()))
}

pub async fn get_generation(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskView>, RelayError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(RelayError::Validation("Task ID is required".to_string()));
    }
    let record = state.reconciler.query(task_id).await?;
    Ok(Json(record.into()))
}

/// Provider push endpoint. Always answers 200: an unacknowledged callback is
/// re-sent by the provider.
pub async fn receive_callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(bytes = body.len(), "callback body is not JSON: {e}");
            Value::Null
        }
    };
    Json(state.reconciler.receive_callback(&payload))
}

#[derive(Debug, Serialize)]
pub struct VideoFileResponse {
    pub file_id: String,
    pub download_url: String,
}

pub async fn get_video_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<VideoFileResponse>, RelayError> {
    let download_url = state.reconciler.resolve_file(&file_id).await?;
    Ok(Json(VideoFileResponse {
        file_id,
        download_url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
}

pub async fn download_video(
    State(state): State<AppState>,
    Json(req): Json<DownloadRequest>,
) -> Result<Json<Value>, RelayError> {
    let url = req
        .download_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| RelayError::Validation("download_url is required".to_string()))?;
    let hint = req.task_id.as_deref().or(req.file_id.as_deref());
    let stored = state.videos.materialize(url, hint).await?;
    Ok(Json(json!({
        "success": true,
        "local_url": stored.local_url,
        "filename": stored.filename,
    })))
}

pub async fn serve_video(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    let bytes = state.videos.read(&filename).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    ))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tasks": state.reconciler.store().len(),
    }))
}
