use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::dispatch::http::{endpoint, parse_base_url};
use crate::error::RelayError;
use crate::reconcile::TaskQuery;
use crate::task::TaskRecord;

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    status_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VideoFileBody {
    download_url: String,
}

#[derive(Debug)]
pub struct HttpTaskClient {
    client: Client,
    base_url: Url,
}

impl HttpTaskClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: parse_base_url(&base_url.into())?,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, segments: &[&str]) -> Result<T, RelayError> {
        let url = endpoint(&self.base_url, segments)?;
        let path = url.path().to_string();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice(&bytes)
                .map_err(|e| RelayError::SchemaParse(format!("{path}: {e}")));
        }

        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
        let message = body
            .error
            .unwrap_or_else(|| format!("{path}: HTTP {status}"));
        Err(match status {
            StatusCode::NOT_FOUND => RelayError::NotFound(message),
            StatusCode::BAD_REQUEST => RelayError::ProviderApplication {
                code: body.status_code.unwrap_or(i64::from(status.as_u16())),
                message,
            },
            _ => RelayError::ProviderTransport {
                message,
                status: Some(status.as_u16()),
            },
        })
    }
}

#[async_trait]
impl TaskQuery for HttpTaskClient {
    async fn query(&self, task_id: &str) -> Result<TaskRecord, RelayError> {
        self.get(&["api", "video-generation", task_id]).await
    }

    async fn resolve_file(&self, file_id: &str) -> Result<String, RelayError> {
        let body: VideoFileBody = self.get(&["api", "video-file", file_id]).await?;
        Ok(body.download_url)
    }
}

