pub mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RelayError;

/// Outbound calls to the video provider.
///
/// Implementations return the raw JSON body of a 2xx response and leave
/// `base_resp` inspection to the caller, so transport failures
/// (`ProviderTransport`, `Request`, `SchemaParse`) stay distinguishable from
/// application errors.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// `POST /video_generation`.
    async fn create_task(&self, payload: &Value) -> Result<Value, RelayError>;

    /// `GET /query/video_generation?task_id=...`.
    async fn query_task(&self, task_id: &str) -> Result<Value, RelayError>;

    /// `GET /files/retrieve?file_id=...`, with the path form as fallback.
    async fn retrieve_file(&self, file_id: &str) -> Result<Value, RelayError>;
}
