use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("provider transport error: {message}")]
    ProviderTransport {
        message: String,
        status: Option<u16>,
    },

    #[error("provider returned status_code {code}: {message}")]
    ProviderApplication { code: i64, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed callback: {0}")]
    CallbackMalformed(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl RelayError {
    /// Returns true for provider-side failures that a stored record may stand in for.
    /// Application errors are deliberate answers from the provider and never qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProviderTransport { .. } => true,
            Self::Request(_) => true,
            Self::SchemaParse(_) => true,
            _ => false,
        }
    }

    /// HTTP status the provider answered with, when the failure came from one.
    pub fn provider_status(&self) -> Option<u16> {
        match self {
            Self::ProviderTransport { status, .. } => *status,
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Produce a sanitized error message safe for returning to browser clients.
    /// Validation and provider application errors keep their text; transport
    /// details (URLs, upstream bodies) stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::ProviderApplication { message, .. } => {
                if message.trim().is_empty() {
                    "provider rejected the request".to_string()
                } else {
                    message.clone()
                }
            }
            Self::ProviderTransport { .. } | Self::Request(_) => {
                "video provider is unreachable, try again shortly".to_string()
            }
            Self::SchemaParse(_) => {
                "unexpected response from video provider, try again shortly".to_string()
            }
            Self::NotFound(what) => format!("not found: {what}"),
            Self::CallbackMalformed(_) => "callback ignored".to_string(),
            Self::Storage(_) => "failed to store video".to_string(),
            Self::Config(msg) => format!("server misconfigured: {msg}"),
        }
    }
}
