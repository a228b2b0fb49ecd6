use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::dispatch::ProviderApi;
use crate::error::RelayError;
use crate::task::normalize::{self, FILE_LOCATOR_RULES};
use crate::task::store::TaskStore;
use crate::task::{TaskRecord, VideoLocator};

/// What the callback endpoint answers with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallbackAck {
    /// Liveness probe: echo the token back as `{"challenge": ...}`.
    Challenge { challenge: Value },
    /// `{"status": "success"}`, sent even when the payload was unusable.
    Accepted { status: &'static str },
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self::Accepted { status: "success" }
    }
}

/// Query interface the client poller drives. Implemented in-process by
/// `Reconciler` and remotely by `client::HttpTaskClient`.
#[async_trait]
pub trait TaskQuery: Send + Sync {
    /// Current canonical record for `task_id`.
    async fn query(&self, task_id: &str) -> Result<TaskRecord, RelayError>;

    /// Turn an opaque file id into a downloadable URL.
    async fn resolve_file(&self, file_id: &str) -> Result<String, RelayError>;
}

/// Folds polls and callbacks for the same task into the store through
/// `TaskStore::merge`. Never advances a task on its own.
pub struct Reconciler {
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn ProviderApi>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TaskStore>, provider: Arc<dyn ProviderApi>) -> Self {
        Self { store, provider }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Stored record without contacting the provider.
    pub fn stored(&self, task_id: &str) -> Result<TaskRecord, RelayError> {
        self.store
            .get(task_id)
            .ok_or_else(|| RelayError::NotFound(format!("task {task_id}")))
    }

    /// Reconcile `task_id` against the provider.
    ///
    /// Terminal records short-circuit. Transient provider failures fall back to
    /// any stored record; application errors are always surfaced and never
    /// merged.
    pub async fn query(&self, task_id: &str) -> Result<TaskRecord, RelayError> {
        let stored = self.store.get(task_id);
        if let Some(record) = &stored
            && record.is_terminal()
        {
            tracing::debug!(task_id, status = %record.status, "returning stored terminal status");
            return Ok(record.clone());
        }

        let raw = match self.provider.query_task(task_id).await {
            Ok(raw) => raw,
            Err(e) if e.is_transient() => {
                return match stored {
                    Some(record) => {
                        tracing::warn!(
                            task_id,
                            status = %record.status,
                            "provider query failed, returning stored status: {e}"
                        );
                        Ok(record)
                    }
                    None if e.provider_status() == Some(404) => {
                        Err(RelayError::NotFound(format!("task {task_id}")))
                    }
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        normalize::check_base_resp(&raw)?;

        let normalized = normalize::normalize(&raw);
        if let Some(reported) = &normalized.task_id
            && reported != task_id
        {
            tracing::warn!(task_id, reported = %reported, "provider answered for a different task id");
        }

        let record = self.store.merge(task_id, &normalized.into_update());
        tracing::info!(task_id, status = %record.status, "task status reconciled");
        Ok(record)
    }

    /// Fold a provider push notification into the store.
    ///
    /// Never fails: the provider re-sends callbacks it believes were lost, so
    /// rejecting a malformed one only invites a retry storm.
    pub fn receive_callback(&self, payload: &Value) -> CallbackAck {
        let task_id = payload.get("task_id").filter(|v| !v.is_null());

        if task_id.is_none()
            && let Some(challenge) = payload.get("challenge")
        {
            tracing::info!("callback challenge received");
            return CallbackAck::Challenge {
                challenge: challenge.clone(),
            };
        }

        let normalized = normalize::normalize(payload);
        match normalized.task_id.clone() {
            Some(task_id) => {
                let record = self.store.merge(&task_id, &normalized.into_update());
                tracing::info!(task_id = %task_id, status = %record.status, "callback merged");
            }
            None => {
                let err = RelayError::CallbackMalformed(describe_payload(payload));
                tracing::warn!("ignoring callback: {err}");
            }
        }

        CallbackAck::accepted()
    }

    /// Secondary resolution: file id to download URL.
    pub async fn resolve_file(&self, file_id: &str) -> Result<String, RelayError> {
        let raw = self.provider.retrieve_file(file_id).await?;
        normalize::check_base_resp(&raw)?;
        match normalize::extract_locator(&raw, FILE_LOCATOR_RULES) {
            Some(VideoLocator::Url(url)) => Ok(url),
            _ => Err(RelayError::SchemaParse(format!(
                "file {file_id}: response carries no download url"
            ))),
        }
    }
}

#[async_trait]
impl TaskQuery for Reconciler {
    async fn query(&self, task_id: &str) -> Result<TaskRecord, RelayError> {
        Reconciler::query(self, task_id).await
    }

    async fn resolve_file(&self, file_id: &str) -> Result<String, RelayError> {
        Reconciler::resolve_file(self, file_id).await
    }
}

fn describe_payload(payload: &Value) -> String {
    match payload {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("no task_id (keys: {})", keys.join(", "))
        }
        Value::Null => "empty body".to_string(),
        other => format!("expected object, got {}", json_kind(other)),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
