//! Shared application state for Axum handlers.
//!
//! Holds the configuration and the cache handle shared with the security
//! pipeline, plus the background maintenance task for the in-process store.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::cache::Cache;
use crate::config::Config;

/// Shared application state.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config, cache);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Cache shared with the security pipeline
    pub cache: Cache,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create the state and start the cache purge task when
    /// `config.cache_purge_interval` is non-zero.
    pub fn new(config: Config, cache: Cache) -> Self {
        let state = Self {
            config: Arc::new(config),
            cache,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        let purge_interval = state.config.cache_purge_interval;
        if state.cache.is_enabled() && !purge_interval.is_zero() {
            state.spawn_purge_task(purge_interval);
        }

        state
    }

    /// Periodically drop expired records so idle keys do not accumulate.
    fn spawn_purge_task(&self, every: Duration) {
        let cache = self.cache.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Cache purge task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        match cache.purge_expired().await {
                            Ok(0) => trace!("Cache purge found nothing to remove"),
                            Ok(removed) => debug!(removed, "Purged expired cache records"),
                            Err(e) => warn!(error = %e, "Cache purge failed"),
                        }
                    }
                }
            }

            debug!("Cache purge task shutting down");
        });
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("All background tasks have completed");
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
