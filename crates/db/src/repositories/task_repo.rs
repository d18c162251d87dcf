//! Repository for the `tasks` table: the durable work queue.
//!
//! Claiming is a single statement using `FOR UPDATE SKIP LOCKED`, so any
//! number of workers can poll concurrently without blocking on each other
//! and without two of them receiving the same row.

use std::time::Duration;

use ingestq_core::state::TaskState;
use ingestq_core::task::{Command, TaskCleanup, CLEANUP_PRIORITY};
use ingestq_core::types::DbId;
use sqlx::{PgConnection, PgExecutor};

use crate::models::task::{Claim, EnqueueTask, Task, TaskStateCount, WorkerStatus};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, command, payload, job_id, state, priority, depends_on, attempts, \
    error, claim_token, claimed_by, created_at, started_at, finished_at";

/// States in which a task has not started executing.
const NOT_STARTED: [TaskState; 2] = TaskState::ACTIONABLE;

fn states(list: &[TaskState]) -> Vec<String> {
    list.iter().map(|s| s.as_str().to_string()).collect()
}

/// Provides queue operations for tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a task. It starts `waiting` when its dependency exists and has
    /// not finished, otherwise `pending`. Behind a dependency that already
    /// `failed` it is inserted `failed`, as the failure cascade would have
    /// done had it existed at the time.
    pub async fn enqueue<'e>(
        executor: impl PgExecutor<'e>,
        input: &EnqueueTask,
    ) -> Result<Task, sqlx::Error> {
        let query = format!(
            "WITH dep AS (SELECT state FROM tasks WHERE id = $5) \
             INSERT INTO tasks \
                 (command, payload, job_id, priority, depends_on, state, error, finished_at) \
             SELECT $1, $2, $3, $4, $5, \
                 CASE \
                     WHEN dep.state = $7 THEN $7 \
                     WHEN dep.state IS NOT NULL AND dep.state <> $6 THEN $8 \
                     ELSE $9 \
                 END, \
                 CASE WHEN dep.state = $7 THEN format('dependency %s failed', $5::BIGINT) END, \
                 CASE WHEN dep.state = $7 THEN NOW() END \
             FROM (SELECT 1) AS one LEFT JOIN dep ON TRUE \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(input.command.kind())
            .bind(input.command.payload())
            .bind(input.command.job_id())
            .bind(input.priority)
            .bind(input.depends_on)
            .bind(TaskState::Finished.as_str())
            .bind(TaskState::Failed.as_str())
            .bind(TaskState::Waiting.as_str())
            .bind(TaskState::Pending.as_str())
            .fetch_one(executor)
            .await
    }

    /// Atomically claim up to `limit` actionable tasks for `worker`.
    ///
    /// A task is actionable when it is `pending` or `waiting` and its
    /// dependency (if any) has `finished`. Claimed rows move to
    /// `processing`, get a fresh claim token and one more attempt. Rows
    /// locked by a concurrent claimer are skipped, never waited on.
    ///
    /// Returned in claim order: `priority DESC, id ASC`.
    pub async fn claim_batch<'e>(
        executor: impl PgExecutor<'e>,
        limit: i64,
        worker: &str,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "WITH candidates AS ( \
                 SELECT t.id AS claim_id FROM tasks t \
                 LEFT JOIN tasks d ON d.id = t.depends_on \
                 WHERE t.state = ANY($1) \
                   AND (t.depends_on IS NULL OR d.state = $2) \
                 ORDER BY t.priority DESC, t.id ASC \
                 LIMIT $3 \
                 FOR UPDATE OF t SKIP LOCKED \
             ) \
             UPDATE tasks \
             SET state = $4, attempts = attempts + 1, started_at = NOW(), \
                 finished_at = NULL, claim_token = gen_random_uuid(), claimed_by = $5 \
             FROM candidates \
             WHERE tasks.id = candidates.claim_id \
             RETURNING {COLUMNS}"
        );
        let mut claimed = sqlx::query_as::<_, Task>(&query)
            .bind(states(&TaskState::ACTIONABLE))
            .bind(TaskState::Finished.as_str())
            .bind(limit.max(1))
            .bind(TaskState::Processing.as_str())
            .bind(worker)
            .fetch_all(executor)
            .await?;
        // UPDATE ... RETURNING does not preserve the CTE's order.
        claimed.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(claimed)
    }

    /// Lock a claimed task for execution.
    ///
    /// Returns `None` when the claim was lost (the task was reaped, released,
    /// cancelled or re-claimed). Waits at most the session's `lock_timeout`.
    pub async fn lock_claimed(
        conn: &mut PgConnection,
        claim: Claim,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE id = $1 AND claim_token = $2 AND state = $3 \
             FOR UPDATE"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(claim.task_id)
            .bind(claim.token)
            .bind(TaskState::Processing.as_str())
            .fetch_optional(conn)
            .await
    }

    /// Mark a claimed task `finished`. Returns `false` if the claim was lost.
    pub async fn mark_finished<'e>(
        executor: impl PgExecutor<'e>,
        claim: Claim,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks \
             SET state = $3, finished_at = NOW(), error = NULL \
             WHERE id = $1 AND claim_token = $2 AND state = $4",
        )
        .bind(claim.task_id)
        .bind(claim.token)
        .bind(TaskState::Finished.as_str())
        .bind(TaskState::Processing.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a claimed task `failed` with its error. Never retried.
    pub async fn mark_failed<'e>(
        executor: impl PgExecutor<'e>,
        claim: Claim,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks \
             SET state = $3, finished_at = NOW(), error = $5 \
             WHERE id = $1 AND claim_token = $2 AND state = $4",
        )
        .bind(claim.task_id)
        .bind(claim.token)
        .bind(TaskState::Failed.as_str())
        .bind(TaskState::Processing.as_str())
        .bind(error)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail every not-yet-started task that depends, directly or
    /// transitively, on `failed_task_id`. Returns the ids that were failed.
    pub async fn cascade_dependency_failure<'e>(
        executor: impl PgExecutor<'e>,
        failed_task_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "WITH RECURSIVE dependents AS ( \
                 SELECT id FROM tasks WHERE depends_on = $1 AND state = ANY($2) \
                 UNION \
                 SELECT t.id FROM tasks t \
                 JOIN dependents dep ON t.depends_on = dep.id \
                 WHERE t.state = ANY($2) \
             ) \
             UPDATE tasks \
             SET state = $3, finished_at = NOW(), error = $4 \
             WHERE id IN (SELECT id FROM dependents) \
             RETURNING id",
        )
        .bind(failed_task_id)
        .bind(states(&NOT_STARTED))
        .bind(TaskState::Failed.as_str())
        .bind(format!("dependency {failed_task_id} failed"))
        .fetch_all(executor)
        .await
    }

    /// Return a claimed task to `pending` without executing it.
    ///
    /// The attempt counter is left as is. Returns `false` if the claim was
    /// already lost.
    pub async fn release<'e>(
        executor: impl PgExecutor<'e>,
        claim: Claim,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks \
             SET state = $3, claim_token = NULL, claimed_by = NULL, started_at = NULL \
             WHERE id = $1 AND claim_token = $2 AND state = $4",
        )
        .bind(claim.task_id)
        .bind(claim.token)
        .bind(TaskState::Pending.as_str())
        .bind(TaskState::Processing.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Return tasks stuck in `processing` for longer than `threshold` to
    /// `pending`. Rows locked by a live executor are skipped. Returns the
    /// reclaimed ids.
    pub async fn reap_stale<'e>(
        executor: impl PgExecutor<'e>,
        threshold: Duration,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "WITH stale AS ( \
                 SELECT id AS stale_id FROM tasks \
                 WHERE state = $1 AND started_at < NOW() - make_interval(secs => $2) \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE tasks \
             SET state = $3, claim_token = NULL, claimed_by = NULL, started_at = NULL \
             FROM stale \
             WHERE tasks.id = stale.stale_id \
             RETURNING tasks.id",
        )
        .bind(TaskState::Processing.as_str())
        .bind(threshold.as_secs_f64())
        .bind(TaskState::Pending.as_str())
        .fetch_all(executor)
        .await
    }

    /// Delete terminal tasks that finished more than `retention_secs` ago.
    pub async fn cleanup<'e>(
        executor: impl PgExecutor<'e>,
        retention_secs: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM tasks \
             WHERE state = ANY($1) \
               AND finished_at < NOW() - make_interval(secs => $2)",
        )
        .bind(states(&[TaskState::Finished, TaskState::Failed]))
        .bind(retention_secs.max(0) as f64)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Enqueue a retention sweep unless one is already queued or running.
    pub async fn schedule_cleanup(
        conn: &mut PgConnection,
        retention_secs: i64,
    ) -> Result<Option<Task>, sqlx::Error> {
        let command = Command::TaskCleanup(TaskCleanup { retention_secs });
        let active: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM tasks WHERE command = $1 AND state = ANY($2))",
        )
        .bind(command.kind())
        .bind(states(&[
            TaskState::Pending,
            TaskState::Waiting,
            TaskState::Processing,
        ]))
        .fetch_one(&mut *conn)
        .await?;
        if active {
            return Ok(None);
        }
        let input = EnqueueTask::new(command).priority(CLEANUP_PRIORITY);
        Self::enqueue(&mut *conn, &input).await.map(Some)
    }

    /// Delete a job's tasks that have not started. Returns the number removed.
    pub async fn cancel_not_started<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE job_id = $1 AND state = ANY($2)")
            .bind(job_id)
            .bind(states(&NOT_STARTED))
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete a job's terminal tasks.
    pub async fn delete_terminal_for_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE job_id = $1 AND state = ANY($2)")
            .bind(job_id)
            .bind(states(&[TaskState::Finished, TaskState::Failed]))
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Count a job's tasks that are not terminal, ignoring `except_task_id`.
    pub async fn count_unfinished_for_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        except_task_id: Option<DbId>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks \
             WHERE job_id = $1 AND state <> ALL($2) \
               AND ($3::BIGINT IS NULL OR id <> $3)",
        )
        .bind(job_id)
        .bind(states(&[TaskState::Finished, TaskState::Failed]))
        .bind(except_task_id)
        .fetch_one(executor)
        .await
    }

    /// Find a task by its internal id.
    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// List a job's tasks in id order.
    pub async fn list_by_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE job_id = $1 ORDER BY id");
        sqlx::query_as::<_, Task>(&query)
            .bind(job_id)
            .fetch_all(executor)
            .await
    }

    /// Count tasks per state, optionally restricted to one job.
    pub async fn counts_by_state<'e>(
        executor: impl PgExecutor<'e>,
        job_id: Option<DbId>,
    ) -> Result<Vec<TaskStateCount>, sqlx::Error> {
        sqlx::query_as::<_, TaskStateCount>(
            "SELECT state, COUNT(*) AS count FROM tasks \
             WHERE $1::BIGINT IS NULL OR job_id = $1 \
             GROUP BY state ORDER BY state",
        )
        .bind(job_id)
        .fetch_all(executor)
        .await
    }

    /// Summarise what the workers are currently busy with.
    pub async fn worker_status<'e>(
        executor: impl PgExecutor<'e>,
    ) -> Result<WorkerStatus, sqlx::Error> {
        sqlx::query_as::<_, WorkerStatus>(
            "SELECT \
                 COALESCE(BOOL_OR(command = 'import_batch'), FALSE) AS is_importing, \
                 COALESCE(BOOL_OR(command = 'derive_statistics'), FALSE) AS is_deriving, \
                 COUNT(*) FILTER (WHERE state <> $2) AS pending, \
                 COUNT(*) FILTER (WHERE state = $2) AS processing \
             FROM tasks WHERE state = ANY($1)",
        )
        .bind(states(&[
            TaskState::Pending,
            TaskState::Waiting,
            TaskState::Processing,
        ]))
        .bind(TaskState::Processing.as_str())
        .fetch_one(executor)
        .await
    }
}
