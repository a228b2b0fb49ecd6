pub mod normalize;
pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical five-state status, independent of provider vocabulary.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Preparing,
    Processing,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Preparing => "preparing",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation mode, fixed when the task is created.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    TextToVideo,
    /// Default when a request omits the mode (older clients only knew this one).
    #[default]
    ImageToVideo,
    FirstLastFrame,
    SubjectReference,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToVideo => "text-to-video",
            Self::ImageToVideo => "image-to-video",
            Self::FirstLastFrame => "first-last-frame",
            Self::SubjectReference => "subject-reference",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text-to-video" => Ok(Self::TextToVideo),
            "image-to-video" => Ok(Self::ImageToVideo),
            "first-last-frame" => Ok(Self::FirstLastFrame),
            "subject-reference" => Ok(Self::SubjectReference),
            other => Err(format!("unknown generation mode: {other}")),
        }
    }
}

/// Where the finished video can be fetched from.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VideoLocator {
    /// Directly downloadable URL.
    Url(String),
    /// Opaque provider file id; needs a secondary lookup to become a URL.
    FileId(String),
}

impl VideoLocator {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url(u) => Some(u),
            Self::FileId(_) => None,
        }
    }

    pub fn file_id(&self) -> Option<&str> {
        match self {
            Self::Url(_) => None,
            Self::FileId(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// One generation job. Only the task store hands these out, always as copies.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    /// `None` only while a callback-created record waits for its `seed`.
    pub mode: Option<GenerationMode>,
    pub status: TaskStatus,
    pub video_locator: Option<VideoLocator>,
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub raw_provider_fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<String>, mode: Option<GenerationMode>, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            mode,
            status: TaskStatus::Queued,
            video_locator: None,
            dimensions: None,
            raw_provider_fields: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Locator is only meaningful once the task succeeded.
    pub fn video_url(&self) -> Option<&str> {
        if self.status != TaskStatus::Succeeded {
            return None;
        }
        self.video_locator.as_ref().and_then(VideoLocator::url)
    }

    /// Field-for-field equality ignoring `updated_at`.
    fn same_content(&self, other: &TaskRecord) -> bool {
        self.task_id == other.task_id
            && self.mode == other.mode
            && self.status == other.status
            && self.video_locator == other.video_locator
            && self.dimensions == other.dimensions
            && self.raw_provider_fields == other.raw_provider_fields
            && self.created_at == other.created_at
    }
}

/// Canonical partial update, produced by the normalizer and applied by `TaskStore::merge`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub video_locator: Option<VideoLocator>,
    pub dimensions: Option<Dimensions>,
    pub raw_provider_fields: Option<Map<String, Value>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_locator(mut self, locator: VideoLocator) -> Self {
        self.video_locator = Some(locator);
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some(Dimensions { width, height });
        self
    }

    /// Apply this update to `record` under the sticky-terminal rule.
    /// Returns true when anything other than `updated_at` changed.
    pub fn apply_to(&self, record: &mut TaskRecord, now: DateTime<Utc>) -> bool {
        let before = record.clone();

        if record.status.is_terminal() {
            // Terminal is final. A repeat of the same terminal state may only
            // fill gaps left by an earlier, sparser signal.
            if self.status == Some(record.status) {
                if record.video_locator.is_none() {
                    record.video_locator = self.video_locator.clone();
                } else if let (Some(VideoLocator::FileId(_)), Some(VideoLocator::Url(u))) =
                    (&record.video_locator, &self.video_locator)
                {
                    record.video_locator = Some(VideoLocator::Url(u.clone()));
                }
                if record.dimensions.is_none() {
                    record.dimensions = self.dimensions;
                }
            }
        } else {
            if let Some(status) = self.status {
                record.status = status;
            }
            match (&record.video_locator, &self.video_locator) {
                (_, None) => {}
                (Some(VideoLocator::Url(_)), Some(VideoLocator::FileId(_))) => {}
                (_, Some(incoming)) => record.video_locator = Some(incoming.clone()),
            }
            if self.dimensions.is_some() {
                record.dimensions = self.dimensions;
            }
            if let Some(raw) = &self.raw_provider_fields {
                record.raw_provider_fields = raw.clone();
            }
        }

        let changed = !record.same_content(&before);
        if changed {
            record.updated_at = now;
        }
        changed
    }
}
