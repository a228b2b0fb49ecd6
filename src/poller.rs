use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::reconcile::TaskQuery;
use crate::storage::{StoredVideo, VideoSink};
use crate::task::{TaskRecord, TaskStatus, VideoLocator};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// 600 polls at 3s is 30 minutes.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Query attempts before giving up. `0` polls until terminal or cancelled.
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded {
        record: TaskRecord,
        /// Provider URL, resolved from the file id when needed.
        video_url: Option<String>,
        /// Local copy, when a sink is attached and the download worked.
        stored: Option<StoredVideo>,
    },
    Failed {
        record: TaskRecord,
    },
    Exhausted {
        attempts: u32,
        last: Option<TaskRecord>,
    },
    Cancelled {
        last: Option<TaskRecord>,
    },
}

impl PollOutcome {
    /// Preferred URL for playback: the local copy, else the provider URL.
    pub fn playback_url(&self) -> Option<&str> {
        match self {
            Self::Succeeded {
                stored, video_url, ..
            } => stored
                .as_ref()
                .map(|s| s.local_url.as_str())
                .or(video_url.as_deref()),
            _ => None,
        }
    }
}

pub struct ClientPoller {
    query: Arc<dyn TaskQuery>,
    sink: Option<Arc<dyn VideoSink>>,
    config: PollerConfig,
}

impl ClientPoller {
    pub fn new(query: Arc<dyn TaskQuery>, config: PollerConfig) -> Self {
        Self {
            query,
            sink: None,
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    /// Spawn the polling loop for `task_id`. The first query runs immediately.
    pub fn start(&self, task_id: impl Into<String>) -> PollerHandle {
        let task_id = task_id.into();
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(None);

        let run = PollRun {
            task_id: task_id.clone(),
            query: Arc::clone(&self.query),
            sink: self.sink.clone(),
            config: self.config,
            token: token.clone(),
            updates: tx,
        };
        let join = tokio::spawn(run.run());

        PollerHandle {
            task_id,
            token,
            updates: rx,
            join: Some(join),
        }
    }
}

/// Owner of a running poll loop. Dropping the handle cancels the loop, so a
/// torn-down view never leaves a timer behind.
pub struct PollerHandle {
    task_id: String,
    token: CancellationToken,
    updates: watch::Receiver<Option<TaskRecord>>,
    join: Option<JoinHandle<PollOutcome>>,
}

impl PollerHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Latest record seen by the loop, for UI updates.
    pub fn updates(&self) -> watch::Receiver<Option<TaskRecord>> {
        self.updates.clone()
    }

    /// Wait for the loop to finish.
    pub async fn wait(mut self) -> PollOutcome {
        let Some(join) = self.join.take() else {
            return PollOutcome::Cancelled {
                last: self.updates.borrow().clone(),
            };
        };
        match join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, "poll loop aborted: {e}");
                PollOutcome::Cancelled {
                    last: self.updates.borrow().clone(),
                }
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct PollRun {
    task_id: String,
    query: Arc<dyn TaskQuery>,
    sink: Option<Arc<dyn VideoSink>>,
    config: PollerConfig,
    token: CancellationToken,
    updates: watch::Sender<Option<TaskRecord>>,
}

impl PollRun {
    async fn run(self) -> PollOutcome {
        let task_id = self.task_id.as_str();
        // First tick of a tokio interval completes immediately.
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts: u32 = 0;
        let mut last: Option<TaskRecord> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    tracing::info!(task_id, attempts, "polling cancelled");
                    return PollOutcome::Cancelled { last };
                }
                _ = ticker.tick() => {}
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    tracing::info!(task_id, attempts, "polling cancelled");
                    return PollOutcome::Cancelled { last };
                }
                r = self.query.query(task_id) => r,
            };

            match result {
                Ok(record) => {
                    tracing::debug!(task_id, attempts, status = %record.status, "poll");
                    self.updates.send_replace(Some(record.clone()));
                    match record.status {
                        TaskStatus::Succeeded => return self.finalize(record).await,
                        TaskStatus::Failed => {
                            tracing::info!(task_id, attempts, "task failed");
                            return PollOutcome::Failed { record };
                        }
                        _ => last = Some(record),
                    }
                }
                Err(e) => {
                    // Query errors are transient from the poller's point of view.
                    tracing::warn!(task_id, attempts, "status check failed: {e}");
                }
            }

            if self.config.max_attempts > 0 && attempts >= self.config.max_attempts {
                tracing::warn!(task_id, attempts, "giving up after max poll attempts");
                return PollOutcome::Exhausted { attempts, last };
            }
        }
    }

    /// Resolve the video URL and, when a sink is attached, keep a local copy.
    /// Failures here still report success: the task itself is done.
    async fn finalize(&self, record: TaskRecord) -> PollOutcome {
        let task_id = self.task_id.as_str();
        let video_url = match &record.video_locator {
            Some(VideoLocator::Url(url)) => Some(url.clone()),
            Some(VideoLocator::FileId(file_id)) => match self.query.resolve_file(file_id).await {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(task_id, file_id = %file_id, "failed to resolve video file: {e}");
                    None
                }
            },
            None => {
                tracing::warn!(task_id, "task succeeded without a video locator");
                None
            }
        };

        let stored = match (&self.sink, &video_url) {
            (Some(sink), Some(url)) => match sink.materialize(url, Some(task_id)).await {
                Ok(stored) => Some(stored),
                Err(e) => {
                    tracing::warn!(task_id, "failed to save video locally: {e}");
                    None
                }
            },
            _ => None,
        };

        tracing::info!(task_id, video_url = ?video_url, "task succeeded");
        PollOutcome::Succeeded {
            record,
            video_url,
            stored,
        }
    }
}
