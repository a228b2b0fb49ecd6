//! Axum router and shared state.
//!
//! Routes:
//! - `POST /api/video-generation`: submit a generation task
//! - `GET  /api/video-generation/{task_id}`: reconciled task status
//! - `POST /api/video-generation/callback` (and `/callback`): provider push
//! - `GET  /api/video-file/{file_id}`: file id to download URL
//! - `POST /api/video-download`: keep a local copy of a video
//! - `GET  /api/videos/{filename}`: serve a local copy
//! - `GET  /health`

mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::dispatch::ProviderApi;
use crate::dispatch::http::HttpDispatch;
use crate::error::RelayError;
use crate::poller::{ClientPoller, PollOutcome, PollerConfig};
use crate::reconcile::{Reconciler, TaskQuery};
use crate::storage::LocalVideoStore;
use crate::submit::Submitter;
use crate::task::store::{MemoryTaskStore, TaskStore};

/// Prefix local videos are served under.
pub const VIDEOS_ROUTE: &str = "/api/videos";

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub submitter: Arc<Submitter>,
    pub videos: Arc<LocalVideoStore>,
    /// Server-side poller for new tasks. Set only without a callback URL.
    pub poller: Option<Arc<ClientPoller>>,
}

impl AppState {
    /// Wire the components around one store and one provider.
    pub fn new(
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn ProviderApi>,
        videos: LocalVideoStore,
        callback_url: Option<String>,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&provider));
        let submitter = Submitter::new(store, provider).with_callback_url(callback_url);
        Self {
            reconciler: Arc::new(reconciler),
            submitter: Arc::new(submitter),
            videos: Arc::new(videos),
            poller: None,
        }
    }

    pub fn with_background_polling(mut self, config: PollerConfig) -> Self {
        let query: Arc<dyn TaskQuery> = self.reconciler.clone();
        self.poller = Some(Arc::new(ClientPoller::new(query, config)));
        self
    }

    /// Follow `task_id` in the background until it settles.
    /// No-op without background polling.
    pub fn track(&self, task_id: &str) {
        let Some(poller) = &self.poller else {
            return;
        };
        let handle = poller.start(task_id);
        tokio::spawn(async move {
            let task_id = handle.task_id().to_string();
            let outcome = match handle.wait().await {
                PollOutcome::Succeeded { .. } => "succeeded",
                PollOutcome::Failed { .. } => "failed",
                PollOutcome::Exhausted { .. } => "exhausted",
                PollOutcome::Cancelled { .. } => "cancelled",
            };
            tracing::info!(task_id = %task_id, outcome, "background polling finished");
        });
    }

    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        let provider = HttpDispatch::new(&config.provider_base_url, config.api_key.clone())?;
        let videos = LocalVideoStore::new(&config.videos_dir, VIDEOS_ROUTE)?;
        let state = Self::new(
            Arc::new(MemoryTaskStore::new()),
            Arc::new(provider),
            videos,
            config.callback_url.clone(),
        );
        Ok(match config.callback_url {
            Some(_) => state,
            None => state.with_background_polling(config.poller),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/video-generation", post(routes::create_generation))
        .route(
            "/api/video-generation/callback",
            post(routes::receive_callback),
        )
        .route("/callback", post(routes::receive_callback))
        .route("/api/video-generation/{task_id}", get(routes::get_generation))
        .route("/api/video-file/{file_id}", get(routes::get_video_file))
        .route("/api/video-download", post(routes::download_video))
        .route("/api/videos/{filename}", get(routes::serve_video))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A quarter of the ttl, kept between 1s and 15min.
pub fn sweep_period(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(15 * 60))
}

/// Periodically drop records older than `ttl` until `shutdown` fires.
pub fn spawn_sweeper(
    store: Arc<dyn TaskStore>,
    ttl: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let period = sweep_period(ttl);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // Skip the immediate first tick; nothing is stale at startup.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = store.purge_older_than(ttl);
                    if purged > 0 {
                        tracing::info!(purged, remaining = store.len(), "expired task records purged");
                    }
                }
            }
        }
    })
}
