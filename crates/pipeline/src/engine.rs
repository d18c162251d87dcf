//! Claim-and-execute engine.
//!
//! A task is claimed and executed in two steps:
//!
//! 1. [`Engine::claim_batch`] flips up to N actionable tasks to `processing`
//!    in one statement and commits, minting a claim token per task.
//! 2. [`Engine::execute`] opens a transaction with a bounded `lock_timeout`,
//!    re-locks the task by `(id, claim_token)` and runs the handler inside a
//!    savepoint. The task's final state, the job bookkeeping and the
//!    handler's writes commit together.
//!
//! Failure handling:
//!
//! | Failure                 | Effect                                                   |
//! |-------------------------|----------------------------------------------------------|
//! | business error          | savepoint rolled back, task `failed`, job `rejected`     |
//! | transient conflict      | everything rolled back, task back to `pending`           |
//! | infrastructure error    | transaction dropped, best-effort release, error returned |
//! | claim lost              | nothing written                                          |

use std::time::Duration;

use ingestq_core::types::DbId;
use ingestq_db::error::{classify, ErrorClass};
use ingestq_db::models::staging_row::RowFailure;
use ingestq_db::models::task::{Claim, EnqueueTask, Task};
use ingestq_db::repositories::TaskRepo;
use ingestq_db::DbPool;
use sqlx::{Acquire, PgConnection};

use crate::controller;
use crate::error::{HandlerError, PipelineError};
use crate::handlers;

/// Default wait for a row lock inside a task transaction.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `lock_timeout` applied to each task transaction.
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Result of executing one claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    /// Business failure recorded on the task.
    Failed { error: String },
    /// Transient conflict; the task is `pending` again.
    Released,
    /// The claim was no longer ours.
    Lost,
}

/// The claim-and-execute engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pool: DbPool,
    config: EngineConfig,
}

impl Engine {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Add a task to the queue.
    pub async fn enqueue(&self, input: &EnqueueTask) -> Result<Task, PipelineError> {
        let task = TaskRepo::enqueue(&self.pool, input).await?;
        tracing::debug!(
            task_id = task.id,
            command = %task.command,
            state = %task.state,
            priority = task.priority,
            "Task enqueued",
        );
        Ok(task)
    }

    /// Claim up to `limit` tasks for `worker`, in execution order.
    pub async fn claim_batch(&self, limit: i64, worker: &str) -> Result<Vec<Task>, PipelineError> {
        Ok(TaskRepo::claim_batch(&self.pool, limit, worker).await?)
    }

    /// Execute a claimed task.
    ///
    /// Returns `Err` only for infrastructure failures; every other failure
    /// is reported through [`Outcome`].
    pub async fn execute(&self, task: &Task) -> Result<Outcome, PipelineError> {
        let Some(claim) = task.claim() else {
            return Ok(Outcome::Lost);
        };

        match self.execute_claimed(claim).await {
            Ok(outcome) => {
                log_outcome(task, &outcome);
                Ok(outcome)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    task_id = task.id,
                    attempts = task.attempts,
                    error = %e,
                    "Transient conflict, releasing task",
                );
                self.release_one(claim).await?;
                Ok(Outcome::Released)
            }
            Err(e) if !e.is_infrastructure() => {
                tracing::error!(task_id = task.id, error = %e, "Task bookkeeping failed");
                let mut tx = self.pool.begin().await?;
                let outcome = fail(&mut tx, task, claim, &e.to_string(), &[]).await?;
                tx.commit().await?;
                log_outcome(task, &outcome);
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(task_id = task.id, error = %e, "Task execution aborted");
                if let Err(release_err) = self.release_one(claim).await {
                    tracing::warn!(
                        task_id = task.id,
                        error = %release_err,
                        "Could not release task, leaving it to the reaper",
                    );
                }
                Err(e)
            }
        }
    }

    /// Return claimed-but-unexecuted tasks to `pending`. Returns how many
    /// were still ours.
    pub async fn release(&self, claims: &[Claim]) -> Result<usize, PipelineError> {
        let mut released = 0;
        for claim in claims {
            if TaskRepo::release(&self.pool, *claim).await? {
                released += 1;
            }
        }
        if released > 0 {
            tracing::info!(released, "Released unexecuted claims");
        }
        Ok(released)
    }

    /// Return abandoned `processing` tasks to `pending`.
    pub async fn reap_stale(&self, threshold: Duration) -> Result<Vec<DbId>, PipelineError> {
        let reaped = TaskRepo::reap_stale(&self.pool, threshold).await?;
        if !reaped.is_empty() {
            tracing::warn!(count = reaped.len(), ids = ?reaped, "Reclaimed abandoned tasks");
        }
        Ok(reaped)
    }

    /// Enqueue a retention sweep unless one is already queued or running.
    pub async fn schedule_cleanup(&self, retention_secs: i64) -> Result<Option<Task>, PipelineError> {
        let mut conn = self.pool.acquire().await?;
        let scheduled = TaskRepo::schedule_cleanup(&mut conn, retention_secs).await?;
        if let Some(task) = &scheduled {
            tracing::info!(task_id = task.id, retention_secs, "Task cleanup scheduled");
        }
        Ok(scheduled)
    }

    async fn release_one(&self, claim: Claim) -> Result<(), PipelineError> {
        TaskRepo::release(&self.pool, claim).await?;
        Ok(())
    }

    async fn execute_claimed(&self, claim: Claim) -> Result<Outcome, PipelineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.config.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        let Some(task) = TaskRepo::lock_claimed(&mut tx, claim).await? else {
            tracing::info!(task_id = claim.task_id, "Claim lost before execution");
            return Ok(Outcome::Lost);
        };

        let command = match task.decode_command() {
            Ok(command) => command,
            Err(e) => {
                let outcome = fail(&mut tx, &task, claim, &e.to_string(), &[]).await?;
                tx.commit().await?;
                return Ok(outcome);
            }
        };

        let handled = {
            let mut savepoint = (&mut *tx).begin().await?;
            match handlers::run(&mut savepoint, &command).await {
                Ok(()) => {
                    savepoint.commit().await?;
                    Ok(())
                }
                // Dropping the savepoint and the transaction rolls both back.
                Err(HandlerError::Database(e)) if classify(&e) != ErrorClass::Business => {
                    return Err(e.into());
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    Err(e)
                }
            }
        };

        let outcome = match handled {
            Ok(()) => {
                if !TaskRepo::mark_finished(&mut *tx, claim).await? {
                    return Ok(Outcome::Lost);
                }
                controller::on_task_finished(&mut tx, &task, &command).await?;
                Outcome::Finished
            }
            Err(HandlerError::Business { message, rows }) => {
                fail(&mut tx, &task, claim, &message, &rows).await?
            }
            Err(HandlerError::Database(e)) => fail(&mut tx, &task, claim, &e.to_string(), &[]).await?,
        };
        tx.commit().await?;
        Ok(outcome)
    }
}

async fn fail(
    conn: &mut PgConnection,
    task: &Task,
    claim: Claim,
    message: &str,
    rows: &[RowFailure],
) -> Result<Outcome, PipelineError> {
    if !TaskRepo::mark_failed(&mut *conn, claim, message).await? {
        return Ok(Outcome::Lost);
    }
    controller::on_task_failed(conn, task, message, rows).await?;
    Ok(Outcome::Failed {
        error: message.to_string(),
    })
}

fn log_outcome(task: &Task, outcome: &Outcome) {
    match outcome {
        Outcome::Finished => tracing::debug!(
            task_id = task.id,
            command = %task.command,
            job_id = task.job_id,
            "Task finished",
        ),
        Outcome::Failed { error } => tracing::warn!(
            task_id = task.id,
            command = %task.command,
            job_id = task.job_id,
            error = %error,
            "Task failed",
        ),
        Outcome::Released | Outcome::Lost => {}
    }
}
