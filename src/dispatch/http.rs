use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::Value;

use crate::dispatch::ProviderApi;
use crate::error::RelayError;

/// Max response body size accepted from the provider (4MB).
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Per-request timeout for create/query/file calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_BASE_URL: &str = "https://api.minimax.io/v1";

/// MiniMax-compatible provider client.
pub struct HttpDispatch {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDispatch")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpDispatch {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()?;

        let base_url = parse_base_url(&base_url.into())?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn api_key(&self) -> Result<&str, RelayError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RelayError::Config("MINIMAX_API_KEY is not set".to_string()))
    }

    /// Send an authorized request and decode a 2xx JSON body.
    async fn send_json(&self, req: RequestBuilder, what: &str) -> Result<Value, RelayError> {
        let response = req
            .bearer_auth(self.api_key()?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > MAX_RESPONSE_BYTES
        {
            return Err(RelayError::ProviderTransport {
                message: format!("{what}: response too large: {len} bytes"),
                status: Some(status.as_u16()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| RelayError::ProviderTransport {
            message: format!("{what}: failed to read response body: {e}"),
            status: Some(status.as_u16()),
        })?;

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(RelayError::ProviderTransport {
                message: format!(
                    "{what}: response too large: {} bytes (max {MAX_RESPONSE_BYTES})",
                    bytes.len()
                ),
                status: Some(status.as_u16()),
            });
        }

        if !status.is_success() {
            // Error bodies usually carry base_resp.status_msg; prefer it over raw text.
            let detail = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|v| {
                    v.pointer("/base_resp/status_msg")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| {
                    let text = String::from_utf8_lossy(&bytes);
                    text.chars().take(200).collect()
                });
            tracing::warn!(status = status.as_u16(), what, "provider returned non-success status");
            return Err(RelayError::ProviderTransport {
                message: format!("{what}: {status}: {detail}"),
                status: Some(status.as_u16()),
            });
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| RelayError::SchemaParse(format!("{what}: {e}")))
    }
}

#[async_trait]
impl ProviderApi for HttpDispatch {
    async fn create_task(&self, payload: &Value) -> Result<Value, RelayError> {
        let url = endpoint(&self.base_url, &["video_generation"])?;
        self.send_json(self.client.post(url).json(payload), "create task")
            .await
    }

    async fn query_task(&self, task_id: &str) -> Result<Value, RelayError> {
        let url = endpoint(&self.base_url, &["query", "video_generation"])?;
        self.send_json(
            self.client.get(url).query(&[("task_id", task_id)]),
            "query task",
        )
        .await
    }

    async fn retrieve_file(&self, file_id: &str) -> Result<Value, RelayError> {
        let url = endpoint(&self.base_url, &["files", "retrieve"])?;
        match self
            .send_json(
                self.client.get(url).query(&[("file_id", file_id)]),
                "retrieve file",
            )
            .await
        {
            Err(e) if e.provider_status() == Some(StatusCode::NOT_FOUND.as_u16()) => {
                tracing::debug!(file_id, "query-param file lookup returned 404, trying path form");
                let url = endpoint(&self.base_url, &["file", file_id])?;
                self.send_json(self.client.get(url), "retrieve file").await
            }
            other => other,
        }
    }
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, RelayError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| RelayError::Config(format!("invalid base url {raw:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(RelayError::Config(format!("invalid base url {raw:?}")));
    }
    Ok(url)
}

/// Append path segments to `base`. Each segment is percent-encoded, so an id
/// containing `/`, `?` or `#` stays a single segment.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, RelayError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| RelayError::Config(format!("invalid base url {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_ids_as_single_segments() {
        let base = parse_base_url("https://api.example.com/v1/").unwrap();
        assert_eq!(
            endpoint(&base, &["file", "a/b?c#d"]).unwrap().as_str(),
            "https://api.example.com/v1/file/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            endpoint(&base, &["query", "video_generation"]).unwrap().as_str(),
            "https://api.example.com/v1/query/video_generation"
        );
    }

    #[test]
    fn base_url_must_be_absolute() {
        assert!(matches!(parse_base_url("api/v1"), Err(RelayError::Config(_))));
        assert!(matches!(
            parse_base_url("mailto:ops@example.com"),
            Err(RelayError::Config(_))
        ));
    }
}
