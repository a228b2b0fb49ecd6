use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::http::DEFAULT_BASE_URL;
use crate::error::RelayError;
use crate::poller::PollerConfig;

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_VIDEOS_DIR: &str = "videos";
const DEFAULT_TASK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Runtime configuration. Every field has a default so the server starts with
/// nothing set (it just cannot reach the provider without an API key).
#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub api_key: Option<String>,
    pub provider_base_url: String,
    pub videos_dir: PathBuf,
    /// Public URL of our callback endpoint, sent with every generation request.
    pub callback_url: Option<String>,
    pub poller: PollerConfig,
    /// Records untouched for this long are dropped by the sweeper.
    pub task_ttl: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("provider_base_url", &self.provider_base_url)
            .field("videos_dir", &self.videos_dir)
            .field("callback_url", &self.callback_url)
            .field("poller", &self.poller)
            .field("task_ttl", &self.task_ttl)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND.to_string(),
            api_key: None,
            provider_base_url: DEFAULT_BASE_URL.to_string(),
            videos_dir: PathBuf::from(DEFAULT_VIDEOS_DIR),
            callback_url: None,
            poller: PollerConfig::default(),
            task_ttl: DEFAULT_TASK_TTL,
        }
    }
}

/// Optional TOML config file. Environment variables override it.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub provider_base_url: Option<String>,
    pub videos_dir: Option<PathBuf>,
    pub callback_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub poll_max_attempts: Option<u32>,
    pub task_ttl_secs: Option<u64>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        toml::from_str(text).map_err(|e| RelayError::Config(format!("invalid config file: {e}")))
    }

    pub fn read(path: &Path) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }
}

impl Config {
    /// Defaults, then the file named by `VIDRELAY_CONFIG` (if any), then env.
    pub fn load() -> Result<Self, RelayError> {
        let mut config = Config::default();
        if let Ok(path) = env::var("VIDRELAY_CONFIG") {
            config.apply_file(FileConfig::read(Path::new(&path))?);
        }
        config.apply_env(|key| env::var(key).ok());

        if config.api_key.is_none() {
            tracing::warn!("MINIMAX_API_KEY not set: provider calls will fail");
        }
        if config.callback_url.is_none() {
            tracing::info!("VIDRELAY_CALLBACK_URL not set: relying on polling only");
        }
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.bind {
            self.bind_address = v;
        }
        if let Some(v) = file.provider_base_url {
            self.provider_base_url = v;
        }
        if let Some(v) = file.videos_dir {
            self.videos_dir = v;
        }
        if let Some(v) = file.callback_url {
            self.callback_url = Some(v);
        }
        if let Some(ms) = file.poll_interval_ms {
            self.poller.interval = Duration::from_millis(ms.max(1));
        }
        if let Some(v) = file.poll_max_attempts {
            self.poller.max_attempts = v;
        }
        if let Some(secs) = file.task_ttl_secs {
            self.task_ttl = Duration::from_secs(secs);
        }
    }

    /// Overlay environment variables read through `get` (injectable for tests).
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("MINIMAX_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = get("MINIMAX_BASE_URL") {
            self.provider_base_url = url;
        }
        if let Some(bind) = get("VIDRELAY_BIND") {
            self.bind_address = bind;
        } else if let Some(port) = get("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.bind_address = format!("0.0.0.0:{port}"),
                Err(_) => tracing::warn!(port = %port, "PORT is not a valid port, ignoring"),
            }
        }
        if let Some(dir) = get("VIDRELAY_VIDEOS_DIR") {
            self.videos_dir = PathBuf::from(dir);
        }
        if let Some(url) = get("VIDRELAY_CALLBACK_URL") {
            self.callback_url = Some(url);
        }
        if let Some(ms) = parse_env::<u64>(&get, "VIDRELAY_POLL_INTERVAL_MS") {
            self.poller.interval = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = parse_env::<u32>(&get, "VIDRELAY_POLL_MAX_ATTEMPTS") {
            self.poller.max_attempts = n;
        }
        if let Some(secs) = parse_env::<u64>(&get, "VIDRELAY_TASK_TTL_SECS") {
            self.task_ttl = Duration::from_secs(secs);
        }
    }
}

fn parse_env<T: std::str::FromStr>(get: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
