//! Claim loops.
//!
//! Each loop repeatedly claims up to `batch_size` tasks and executes them in
//! claim order. Loops share nothing but the engine's pool and the
//! cancellation token.
//!
//! | Event                    | Reaction                                         |
//! |--------------------------|--------------------------------------------------|
//! | empty poll               | sleep `poll_interval`; exit after `idle_polls`   |
//! | transient conflict       | sleep `conflict_backoff`, claim again            |
//! | infrastructure failure   | release unexecuted claims, reconnect w/ backoff  |
//! | cancellation             | finish current task, release the rest, exit      |

use std::time::Duration;

use ingestq_core::backoff::{Backoff, BackoffConfig};
use ingestq_core::polling::IdleTracker;
use ingestq_db::models::task::{Claim, Task};
use ingestq_pipeline::{Engine, Outcome};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::reaper::{Reaper, ReaperConfig};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub batch_size: i64,
    pub workers: usize,
    /// `Some(n)`: exit after `n` consecutive empty polls. `None`: poll forever.
    pub idle_polls: Option<u32>,
    pub poll_interval: Duration,
    pub conflict_backoff: Duration,
    pub reconnect: BackoffConfig,
}

/// Task outcomes counted over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub finished: u64,
    pub failed: u64,
    pub released: u64,
    pub lost: u64,
    /// Loops that ended by panicking.
    pub crashed: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Finished => self.finished += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Released => self.released += 1,
            Outcome::Lost => self.lost += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.finished += other.finished;
        self.failed += other.failed;
        self.released += other.released;
        self.lost += other.lost;
        self.crashed += other.crashed;
    }

    /// No task failed and no loop crashed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.crashed == 0
    }
}

/// Runs `workers` claim loops until they go idle or are cancelled.
pub struct WorkerRuntime {
    engine: Engine,
    config: RuntimeConfig,
    reaper: Option<ReaperConfig>,
    name: String,
}

impl WorkerRuntime {
    pub fn new(engine: Engine, config: RuntimeConfig) -> Self {
        Self {
            engine,
            config,
            reaper: None,
            name: format!("worker-{}", std::process::id()),
        }
    }

    /// Run the liveness reaper alongside the loops.
    pub fn with_reaper(mut self, config: ReaperConfig) -> Self {
        self.reaper = Some(config);
        self
    }

    /// Prefix for the `claimed_by` names of this runtime's loops.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub async fn run(self, cancel: CancellationToken) -> RunSummary {
        tracing::info!(
            worker = %self.name,
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            stop_when_idle = self.config.idle_polls.is_some(),
            "Worker runtime started",
        );

        // Loops going idle stops the reaper; an outside cancel stops both.
        let reaper_cancel = cancel.child_token();
        let reaper_handle = self.reaper.clone().map(|config| {
            let reaper = Reaper::new(self.engine.clone(), config);
            tokio::spawn(reaper.run(reaper_cancel.clone()))
        });

        let mut loops = JoinSet::new();
        for n in 1..=self.config.workers {
            let worker = WorkerLoop {
                engine: self.engine.clone(),
                config: self.config.clone(),
                name: format!("{}-{n}", self.name),
            };
            loops.spawn(worker.run(cancel.clone()));
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(loop_summary) => summary.merge(loop_summary),
                Err(e) => {
                    tracing::error!(error = %e, "Worker loop crashed");
                    summary.crashed += 1;
                }
            }
        }

        reaper_cancel.cancel();
        if let Some(handle) = reaper_handle {
            let _ = handle.await;
        }

        tracing::info!(
            worker = %self.name,
            finished = summary.finished,
            failed = summary.failed,
            released = summary.released,
            lost = summary.lost,
            "Worker runtime stopped",
        );
        summary
    }
}

struct WorkerLoop {
    engine: Engine,
    config: RuntimeConfig,
    name: String,
}

impl WorkerLoop {
    async fn run(self, cancel: CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut idle = IdleTracker::new(self.config.idle_polls);

        while !cancel.is_cancelled() {
            let claimed = match self
                .engine
                .claim_batch(self.config.batch_size, &self.name)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) if e.is_transient() => {
                    tracing::debug!(worker = %self.name, error = %e, "Claim conflict, backing off");
                    sleep_or_cancel(self.config.conflict_backoff, &cancel).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(worker = %self.name, error = %e, "Claim failed");
                    if !self.reconnect(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            if idle.record(claimed.len()) {
                tracing::info!(
                    worker = %self.name,
                    empty_polls = idle.consecutive_empty(),
                    "Queue idle, stopping",
                );
                break;
            }
            if claimed.is_empty() {
                sleep_or_cancel(self.config.poll_interval, &cancel).await;
                continue;
            }

            if !self.execute_batch(&claimed, &mut summary, &cancel).await
                && !self.reconnect(&cancel).await
            {
                break;
            }
        }

        tracing::debug!(worker = %self.name, "Worker loop exited");
        summary
    }

    /// Execute claimed tasks in order. Returns `false` when storage was lost.
    async fn execute_batch(
        &self,
        claimed: &[Task],
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> bool {
        for (i, task) in claimed.iter().enumerate() {
            if cancel.is_cancelled() {
                self.release_rest(&claimed[i..]).await;
                return true;
            }
            match self.engine.execute(task).await {
                Ok(outcome) => {
                    summary.record(&outcome);
                    if outcome == Outcome::Released {
                        sleep_or_cancel(self.config.conflict_backoff, cancel).await;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        worker = %self.name,
                        task_id = task.id,
                        error = %e,
                        "Task execution aborted",
                    );
                    self.release_rest(&claimed[i + 1..]).await;
                    return false;
                }
            }
        }
        true
    }

    /// Best-effort release; anything left over is picked up by the reaper.
    async fn release_rest(&self, tasks: &[Task]) {
        let claims: Vec<Claim> = tasks.iter().filter_map(Task::claim).collect();
        if claims.is_empty() {
            return;
        }
        if let Err(e) = self.engine.release(&claims).await {
            tracing::warn!(
                worker = %self.name,
                claims = claims.len(),
                error = %e,
                "Could not release claims, leaving them to the reaper",
            );
        }
    }

    /// Wait until the database answers again. Returns `false` if cancelled
    /// first.
    async fn reconnect(&self, cancel: &CancellationToken) -> bool {
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        loop {
            let wait = backoff.next_wait();
            tracing::warn!(
                worker = %self.name,
                attempt = backoff.attempt(),
                delay_ms = wait.as_millis() as u64,
                "Database unavailable, retrying",
            );
            if !sleep_or_cancel(wait, cancel).await {
                return false;
            }
            match ingestq_db::health_check(self.engine.pool()).await {
                Ok(()) => {
                    tracing::info!(worker = %self.name, "Database reachable again");
                    return true;
                }
                Err(e) => {
                    tracing::debug!(worker = %self.name, error = %e, "Health check failed");
                }
            }
        }
    }
}

/// Sleep for `duration`. Returns `false` if cancelled first.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
