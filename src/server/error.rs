use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::RelayError;

impl RelayError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::ProviderApplication { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ProviderTransport { .. } | Self::Request(_) | Self::SchemaParse(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::CallbackMalformed(_) => StatusCode::OK,
            Self::Storage(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        match &self {
            Self::Validation(_) | Self::NotFound(_) => {
                tracing::info!(status = status.as_u16(), "request rejected: {self}");
            }
            Self::ProviderApplication { .. } => tracing::warn!("provider error: {self}"),
            _ => tracing::error!(error = ?self, "request failed"),
        }

        let status_code = match &self {
            Self::ProviderApplication { code, .. } => *code,
            _ => i64::from(status.as_u16()),
        };
        let body = json!({
            "error": self.user_message(),
            "status_code": status_code,
        });
        (status, Json(body)).into_response()
    }
}
