//! Liveness reaper.
//!
//! Returns tasks stuck in `processing` past the threshold to `pending`, and
//! periodically enqueues a retention sweep of old terminal tasks.

use std::time::Duration;

use ingestq_core::polling::{DEFAULT_REAPER_INTERVAL, DEFAULT_REAPER_THRESHOLD};
use ingestq_core::task::DEFAULT_TASK_RETENTION_SECS;
use ingestq_pipeline::Engine;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How often a retention sweep is enqueued.
const DEFAULT_CLEANUP_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub threshold: Duration,
    pub cleanup_every: Duration,
    pub retention_secs: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAPER_INTERVAL,
            threshold: DEFAULT_REAPER_THRESHOLD,
            cleanup_every: DEFAULT_CLEANUP_EVERY,
            retention_secs: DEFAULT_TASK_RETENTION_SECS,
        }
    }
}

pub struct Reaper {
    engine: Engine,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(engine: Engine, config: ReaperConfig) -> Self {
        Self { engine, config }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_cleanup = Instant::now();
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            threshold_secs = self.config.threshold.as_secs(),
            "Reaper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                    if Instant::now() >= next_cleanup {
                        self.schedule_cleanup().await;
                        next_cleanup = Instant::now() + self.config.cleanup_every;
                    }
                }
            }
        }
    }

    async fn sweep(&self) {
        if let Err(e) = self.engine.reap_stale(self.config.threshold).await {
            tracing::error!(error = %e, "Reaper sweep failed");
        }
    }

    async fn schedule_cleanup(&self) {
        if let Err(e) = self.engine.schedule_cleanup(self.config.retention_secs).await {
            tracing::error!(error = %e, "Could not schedule task cleanup");
        }
    }
}
