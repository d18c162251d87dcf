//! Import job lifecycle.
//!
//! ```text
//! created -> waiting_for_upload -> processing -> finished
//!                                             -> rejected
//! any state except processing -> deleted
//! ```
//!
//! Gateway-facing operations run in their own transactions and lock the job
//! row. The `on_task_*` hooks run inside the engine's task transaction, so a
//! task's completion and its effect on the job commit or roll back together.

use ingestq_core::error::CoreError;
use ingestq_core::import_job::{plan_batches, validate_batch_size, JobProgress};
use ingestq_core::state::ImportJobState;
use ingestq_core::task::{Command, DeriveStatistics, ImportBatch, DERIVE_PRIORITY};
use ingestq_core::types::{CallerIdentity, DbId};
use ingestq_db::error::{sqlstate, UNIQUE_VIOLATION};
use ingestq_db::models::import_definition::{CreateImportDefinition, ImportDefinition};
use ingestq_db::models::import_job::{CreateImportJob, ImportJob};
use ingestq_db::models::staging_row::{RowFailure, StagingRow};
use ingestq_db::models::statistics::ImportJobStatistics;
use ingestq_db::models::task::{EnqueueTask, Task};
use ingestq_db::repositories::{
    ImportDefinitionRepo, ImportJobRepo, StagingRowRepo, StatisticsRepo, TaskRepo,
};
use ingestq_db::DbPool;
use sqlx::PgConnection;
use validator::Validate;

use crate::error::PipelineError;

fn job_not_found(id: DbId) -> PipelineError {
    CoreError::NotFound {
        entity: "ImportJob",
        id,
    }
    .into()
}

/// Drives import jobs through their state machine.
#[derive(Clone)]
pub struct ImportJobController {
    pool: DbPool,
}

impl ImportJobController {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a reusable column mapping.
    pub async fn create_definition(
        &self,
        input: &CreateImportDefinition,
    ) -> Result<ImportDefinition, PipelineError> {
        input.validate()?;
        if let Some(size) = input.batch_size {
            validate_batch_size(size)?;
        }
        ImportDefinitionRepo::create(&self.pool, input)
            .await
            .map_err(|e| unique_to_conflict(e, "Import definition", &input.slug))
    }

    /// Create a job against a definition.
    ///
    /// The job is inserted in `created`. A valid mapping moves it on to
    /// `waiting_for_upload`; an invalid one leaves it in `created` with the
    /// problem recorded in `error`.
    pub async fn create_job(
        &self,
        input: &CreateImportJob,
        caller: &CallerIdentity,
    ) -> Result<ImportJob, PipelineError> {
        input.validate()?;

        let mut tx = self.pool.begin().await?;
        let definition = ImportDefinitionRepo::find_by_id(&mut *tx, input.definition_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "ImportDefinition",
                id: input.definition_id,
            })?;
        let job = ImportJobRepo::create(&mut *tx, input, caller)
            .await
            .map_err(|e| unique_to_conflict(e, "Import job", &input.slug))?;

        let checked = definition
            .parsed_mapping()
            .and_then(|_| validate_batch_size(definition.batch_size));
        let job = match checked {
            Ok(()) => ImportJobRepo::transition(
                &mut *tx,
                job.id,
                ImportJobState::Created,
                ImportJobState::WaitingForUpload,
            )
            .await?
            .ok_or_else(|| job_not_found(job.id))?,
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "Import job definition is invalid");
                ImportJobRepo::set_error(&mut *tx, job.id, &e.to_string())
                    .await?
                    .ok_or_else(|| job_not_found(job.id))?
            }
        };
        tx.commit().await?;

        tracing::info!(
            job_id = job.id,
            slug = %job.slug,
            state = %job.state,
            created_by = %caller,
            "Import job created",
        );
        Ok(job)
    }

    /// Append uploaded rows. Only while `waiting_for_upload`.
    pub async fn stage_rows(
        &self,
        job_id: DbId,
        rows: &[serde_json::Value],
    ) -> Result<u64, PipelineError> {
        let mut tx = self.pool.begin().await?;
        let job = ImportJobRepo::lock(&mut tx, job_id)
            .await?
            .ok_or_else(|| job_not_found(job_id))?;
        if job.state != ImportJobState::WaitingForUpload {
            return Err(CoreError::Conflict(format!(
                "Rows can only be staged while waiting for upload, job {job_id} is '{}'",
                job.state
            ))
            .into());
        }
        let inserted = StagingRowRepo::append(&mut *tx, job_id, rows).await?;
        tx.commit().await?;
        tracing::debug!(job_id, inserted, "Rows staged");
        Ok(inserted)
    }

    /// Close the upload and schedule processing.
    ///
    /// Enqueues one `import_batch` per `batch_size` rows, each depending on
    /// the previous one so a unit's parent from an earlier batch exists
    /// before its children are written. An empty upload goes straight to
    /// statistics.
    pub async fn upload_complete(&self, job_id: DbId) -> Result<ImportJob, PipelineError> {
        let mut tx = self.pool.begin().await?;
        let job = ImportJobRepo::lock(&mut tx, job_id)
            .await?
            .ok_or_else(|| job_not_found(job_id))?;
        job.state.ensure_transition(ImportJobState::Processing)?;

        let definition = ImportDefinitionRepo::find_by_id(&mut *tx, job.definition_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "ImportDefinition",
                id: job.definition_id,
            })?;
        let staged = StagingRowRepo::count(&mut *tx, job_id).await?;
        let total_rows = i32::try_from(staged).map_err(|_| {
            CoreError::Validation(format!("Upload of {staged} rows exceeds the row limit"))
        })?;

        let job = ImportJobRepo::start_processing(&mut *tx, job_id, total_rows)
            .await?
            .ok_or_else(|| job_not_found(job_id))?;

        let plan = plan_batches(total_rows, definition.batch_size);
        let mut previous: Option<DbId> = None;
        for range in &plan {
            let command = Command::ImportBatch(ImportBatch {
                job_id,
                batch_seq: range.batch_seq,
                first_row: range.first_row,
                last_row: range.last_row,
            });
            let mut input = EnqueueTask::new(command);
            if let Some(prev) = previous {
                input = input.depends_on(prev);
            }
            previous = Some(TaskRepo::enqueue(&mut *tx, &input).await?.id);
        }
        if plan.is_empty() {
            enqueue_derive(&mut tx, job_id).await?;
        }
        tx.commit().await?;

        tracing::info!(
            job_id,
            total_rows,
            batches = plan.len(),
            batch_size = definition.batch_size,
            "Upload complete, import scheduled",
        );
        Ok(job)
    }

    /// Administratively delete a job. Refused while it is processing.
    ///
    /// Not-yet-started tasks are cancelled at once. Staging rows and
    /// terminal tasks are collected now if nothing is in flight, otherwise
    /// by the engine after the last in-flight task ends.
    pub async fn delete_job(&self, job_id: DbId) -> Result<ImportJob, PipelineError> {
        let mut tx = self.pool.begin().await?;
        let job = ImportJobRepo::lock(&mut tx, job_id)
            .await?
            .ok_or_else(|| job_not_found(job_id))?;
        job.state.ensure_transition(ImportJobState::Deleted)?;

        let job = ImportJobRepo::transition(&mut *tx, job_id, job.state, ImportJobState::Deleted)
            .await?
            .ok_or_else(|| job_not_found(job_id))?;
        let cancelled = TaskRepo::cancel_not_started(&mut *tx, job_id).await?;
        let collected = collect_if_deleted(&mut tx, job_id).await?;
        tx.commit().await?;

        tracing::info!(job_id, cancelled, collected, "Import job deleted");
        Ok(job)
    }

    pub async fn find_job(&self, job_id: DbId) -> Result<ImportJob, PipelineError> {
        ImportJobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or_else(|| job_not_found(job_id))
    }

    pub async fn progress(&self, job_id: DbId) -> Result<JobProgress, PipelineError> {
        Ok(self.find_job(job_id).await?.progress())
    }

    /// Staging rows that failed to import, in row order.
    pub async fn rejected_rows(&self, job_id: DbId) -> Result<Vec<StagingRow>, PipelineError> {
        self.find_job(job_id).await?;
        Ok(StagingRowRepo::list_errors(&self.pool, job_id).await?)
    }

    pub async fn statistics(
        &self,
        job_id: DbId,
    ) -> Result<Option<ImportJobStatistics>, PipelineError> {
        Ok(StatisticsRepo::find(&self.pool, job_id).await?)
    }
}

fn unique_to_conflict(err: sqlx::Error, entity: &str, slug: &str) -> PipelineError {
    if sqlstate(&err).as_deref() == Some(UNIQUE_VIOLATION) {
        CoreError::Conflict(format!("{entity} with slug '{slug}' already exists")).into()
    } else {
        err.into()
    }
}

async fn enqueue_derive(conn: &mut PgConnection, job_id: DbId) -> Result<Task, sqlx::Error> {
    let input = EnqueueTask::new(Command::DeriveStatistics(DeriveStatistics { job_id }))
        .priority(DERIVE_PRIORITY);
    TaskRepo::enqueue(conn, &input).await
}

/// Garbage-collect a deleted job once none of its tasks is processing.
/// Returns whether anything was collected.
async fn collect_if_deleted(conn: &mut PgConnection, job_id: DbId) -> Result<bool, sqlx::Error> {
    let Some(job) = ImportJobRepo::find_by_id(&mut *conn, job_id).await? else {
        return Ok(false);
    };
    if job.state != ImportJobState::Deleted {
        return Ok(false);
    }
    let in_flight = TaskRepo::count_unfinished_for_job(&mut *conn, job_id, None).await?;
    if in_flight > 0 {
        return Ok(false);
    }
    let rows = StagingRowRepo::delete_for_job(&mut *conn, job_id).await?;
    let tasks = TaskRepo::delete_terminal_for_job(&mut *conn, job_id).await?;
    tracing::info!(job_id, rows, tasks, "Deleted import job collected");
    Ok(true)
}

// ---------------------------------------------------------------------------
// Engine hooks
// ---------------------------------------------------------------------------

/// Called after a task was marked `finished`, in the same transaction.
pub(crate) async fn on_task_finished(
    conn: &mut PgConnection,
    task: &Task,
    command: &Command,
) -> Result<(), sqlx::Error> {
    match command {
        Command::ImportBatch(batch) => {
            let updated =
                ImportJobRepo::add_processed_rows(&mut *conn, batch.job_id, batch.row_count())
                    .await?;
            if let Some(job) = updated {
                if job.processed_rows >= job.total_rows {
                    let derive = enqueue_derive(&mut *conn, job.id).await?;
                    tracing::info!(
                        job_id = job.id,
                        task_id = derive.id,
                        "All rows imported, statistics scheduled",
                    );
                }
            }
            collect_if_deleted(conn, batch.job_id).await?;
        }
        Command::DeriveStatistics(derive) => {
            let open = TaskRepo::count_unfinished_for_job(&mut *conn, derive.job_id, Some(task.id))
                .await?;
            if open == 0 {
                let finished = ImportJobRepo::transition(
                    &mut *conn,
                    derive.job_id,
                    ImportJobState::Processing,
                    ImportJobState::Finished,
                )
                .await?;
                if finished.is_some() {
                    tracing::info!(job_id = derive.job_id, "Import job finished");
                }
            } else {
                tracing::warn!(
                    job_id = derive.job_id,
                    open,
                    "Statistics derived but job still has open tasks",
                );
            }
            collect_if_deleted(conn, derive.job_id).await?;
        }
        Command::TaskCleanup(_) => {}
    }
    Ok(())
}

/// Called after a task was marked `failed`, in the same transaction.
///
/// Fails the task's dependents and, for job tasks, records row errors,
/// rejects the job and cancels its remaining work.
pub(crate) async fn on_task_failed(
    conn: &mut PgConnection,
    task: &Task,
    message: &str,
    rows: &[RowFailure],
) -> Result<(), sqlx::Error> {
    let cascaded = TaskRepo::cascade_dependency_failure(&mut *conn, task.id).await?;
    if !cascaded.is_empty() {
        tracing::info!(task_id = task.id, dependents = cascaded.len(), "Dependent tasks failed");
    }

    let Some(job_id) = task.job_id else {
        return Ok(());
    };
    for row in rows {
        StagingRowRepo::mark_error(&mut *conn, job_id, row.row_no, &row.error).await?;
    }
    if let Some(job) = ImportJobRepo::reject(&mut *conn, job_id, message).await? {
        let cancelled = TaskRepo::cancel_not_started(&mut *conn, job_id).await?;
        tracing::warn!(
            job_id = job.id,
            task_id = task.id,
            cancelled,
            error = message,
            "Import job rejected",
        );
    }
    collect_if_deleted(conn, job_id).await?;
    Ok(())
}

