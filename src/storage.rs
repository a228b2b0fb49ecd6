use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::RelayError;

/// Videos can be large and the provider CDN slow.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard cap on a single downloaded video (512MB).
pub const MAX_VIDEO_BYTES: usize = 512 * 1024 * 1024;

/// Atomic counter for unique temp filenames.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredVideo {
    /// URL the video is served back from.
    pub local_url: String,
    pub filename: String,
}

/// Where finished videos end up.
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Fetch `download_url` and persist it under a name derived from `name_hint`.
    async fn materialize(
        &self,
        download_url: &str,
        name_hint: Option<&str>,
    ) -> Result<StoredVideo, RelayError>;
}

/// Stores videos in a local directory and serves them under `public_prefix`.
#[derive(Debug)]
pub struct LocalVideoStore {
    client: Client,
    dir: PathBuf,
    public_prefix: String,
}

impl LocalVideoStore {
    pub fn new(dir: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            dir: dir.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a served filename to a path inside the store, rejecting anything
    /// that could escape it.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf, RelayError> {
        let valid = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && filename
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(RelayError::NotFound(format!("video {filename}")));
        }
        Ok(self.dir.join(filename))
    }

    /// Read a stored video.
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, RelayError> {
        let path = self.path_for(filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RelayError::NotFound(format!("video {filename}")))
            }
            Err(e) => Err(RelayError::Storage(e)),
        }
    }

    /// Write `bytes` as `filename` atomically: temp file + rename.
    pub async fn write(&self, filename: &str, bytes: &[u8]) -> Result<StoredVideo, RelayError> {
        let path = self.path_for(filename)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.dir.join(format!(".{filename}.{seq}.tmp"));
        tokio::fs::write(&tmp_path, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(RelayError::Storage(e));
        }

        Ok(StoredVideo {
            local_url: format!("{}/{filename}", self.public_prefix),
            filename: filename.to_string(),
        })
    }
}

#[async_trait]
impl VideoSink for LocalVideoStore {
    async fn materialize(
        &self,
        download_url: &str,
        name_hint: Option<&str>,
    ) -> Result<StoredVideo, RelayError> {
        let filename = video_filename(name_hint);
        let preview: String = download_url.chars().take(100).collect();
        tracing::info!(filename = %filename, url = %preview, "downloading video");

        let response = self
            .client
            .get(download_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::ProviderTransport {
                message: format!("video download failed with HTTP {status}"),
                status: Some(status.as_u16()),
            });
        }
        if let Some(len) = response.content_length()
            && len as usize > MAX_VIDEO_BYTES
        {
            return Err(RelayError::ProviderTransport {
                message: format!("video too large: {len} bytes"),
                status: Some(status.as_u16()),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_VIDEO_BYTES {
            return Err(RelayError::ProviderTransport {
                message: format!("video too large: {} bytes", bytes.len()),
                status: Some(status.as_u16()),
            });
        }

        let stored = self.write(&filename, &bytes).await?;
        tracing::info!(filename = %stored.filename, bytes = bytes.len(), "video saved locally");
        Ok(stored)
    }
}

/// Sanitize an id for use in filenames. Only allows alphanumeric, `-`, `_`.
pub fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `{task_id or file_id}.mp4`, or a timestamp when neither is known.
pub fn video_filename(name_hint: Option<&str>) -> String {
    let stem = name_hint
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(sanitize_file_stem)
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
                .to_string()
        });
    format!("{stem}.mp4")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_from_hint() {
        assert_eq!(video_filename(Some("T-1")), "T-1.mp4");
        assert_eq!(video_filename(Some("../etc/passwd")), "___etc_passwd.mp4");
        assert!(video_filename(None).ends_with(".mp4"));
        assert!(video_filename(Some("  ")).ends_with(".mp4"));
    }

    #[test]
    fn path_for_rejects_traversal() {
        let store = LocalVideoStore::new("/tmp/vidrelay-test", "/api/videos").unwrap();
        assert!(store.path_for("ok-1.mp4").is_ok());
        for bad in ["", "..", "../x.mp4", "a/b.mp4", "a\\b.mp4"] {
            assert!(
                matches!(store.path_for(bad), Err(RelayError::NotFound(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
