use std::time::Duration;

use clap::Parser;
use ingestq_core::backoff::BackoffConfig;
use ingestq_core::polling::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONFLICT_BACKOFF, DEFAULT_IDLE_POLLS, DEFAULT_POLL_INTERVAL,
    DEFAULT_REAPER_INTERVAL, DEFAULT_REAPER_THRESHOLD,
};
use ingestq_pipeline::EngineConfig;

use crate::error::WorkerError;
use crate::reaper::ReaperConfig;
use crate::runtime::RuntimeConfig;

/// Command-line flags, each with an environment fallback.
#[derive(Debug, Clone, Parser)]
#[command(name = "ingestq-worker", version, about = "Claims and executes queued tasks")]
pub struct WorkerConfig {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Tasks claimed per poll.
    #[arg(long, env = "WORKER_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: i64,

    /// Independent claim loops in this process.
    #[arg(long, env = "WORKER_COUNT", default_value_t = 1)]
    pub workers: usize,

    /// Exit once the queue stays empty for `--idle-polls` polls.
    #[arg(long, env = "WORKER_STOP_WHEN_IDLE")]
    pub stop_when_idle: bool,

    #[arg(long, env = "WORKER_IDLE_POLLS", default_value_t = DEFAULT_IDLE_POLLS)]
    pub idle_polls: u32,

    #[arg(long, env = "WORKER_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "WORKER_CONFLICT_BACKOFF_MS", default_value_t = DEFAULT_CONFLICT_BACKOFF.as_millis() as u64)]
    pub conflict_backoff_ms: u64,

    /// How long a task waits for a row lock before it is released for retry.
    #[arg(long, env = "WORKER_LOCK_TIMEOUT_MS", default_value_t = 5000)]
    pub lock_timeout_ms: u64,

    /// Age after which a `processing` task is considered abandoned.
    #[arg(long, env = "WORKER_REAPER_THRESHOLD_SECS", default_value_t = DEFAULT_REAPER_THRESHOLD.as_secs())]
    pub reaper_threshold_secs: u64,

    #[arg(long, env = "WORKER_REAPER_INTERVAL_SECS", default_value_t = DEFAULT_REAPER_INTERVAL.as_secs())]
    pub reaper_interval_secs: u64,

    /// Pool size. Defaults to one connection per loop plus two.
    #[arg(long, env = "WORKER_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,
}

impl WorkerConfig {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.batch_size < 1 {
            return Err(WorkerError::Config(format!(
                "batch size must be at least 1, got {}",
                self.batch_size
            )));
        }
        if self.workers < 1 {
            return Err(WorkerError::Config("at least one worker is required".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(WorkerError::Config("poll interval must be positive".into()));
        }
        if self.reaper_interval_secs == 0 {
            return Err(WorkerError::Config("reaper interval must be positive".into()));
        }
        if self.max_connections == Some(0) {
            return Err(WorkerError::Config("max connections must be positive".into()));
        }
        Ok(())
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
            .unwrap_or_else(|| u32::try_from(self.workers).unwrap_or(u32::MAX).saturating_add(2))
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }

    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            batch_size: self.batch_size,
            workers: self.workers,
            idle_polls: self.stop_when_idle.then_some(self.idle_polls),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            conflict_backoff: Duration::from_millis(self.conflict_backoff_ms),
            reconnect: BackoffConfig::default(),
        }
    }

    pub fn reaper(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_secs(self.reaper_interval_secs),
            threshold: Duration::from_secs(self.reaper_threshold_secs),
            ..ReaperConfig::default()
        }
    }
}
