//! Repository for the `import_jobs` table.
//!
//! State changes are conditioned on the expected current state in SQL, so a
//! concurrent transition shows up as "no row updated" instead of a lost write.

use ingestq_core::state::ImportJobState;
use ingestq_core::types::{CallerIdentity, DbId};
use sqlx::{PgConnection, PgExecutor};

use crate::models::import_job::{CreateImportJob, ImportJob};

/// Column list for `import_jobs` queries.
const COLUMNS: &str = "\
    id, definition_id, slug, state, total_rows, processed_rows, \
    default_valid_from, default_valid_to, created_by, error, \
    created_at, updated_at, upload_completed_at, finished_at";

/// Provides CRUD and state-machine updates for import jobs.
pub struct ImportJobRepo;

impl ImportJobRepo {
    /// Insert a job in `created`.
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        input: &CreateImportJob,
        created_by: &CallerIdentity,
    ) -> Result<ImportJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO import_jobs \
                 (definition_id, slug, state, default_valid_from, default_valid_to, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(input.definition_id)
            .bind(&input.slug)
            .bind(ImportJobState::Created.as_str())
            .bind(input.default_valid_from)
            .bind(input.default_valid_to)
            .bind(created_by.as_str())
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
    ) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_jobs WHERE id = $1");
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn list_by_ids<'e>(
        executor: impl PgExecutor<'e>,
        ids: &[DbId],
    ) -> Result<Vec<ImportJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_jobs WHERE id = ANY($1) ORDER BY id");
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(ids)
            .fetch_all(executor)
            .await
    }

    /// Lock a job row for the rest of the transaction.
    pub async fn lock(conn: &mut PgConnection, id: DbId) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Move `from -> to`. Returns the updated job, or `None` when the job is
    /// not in `from` any more. Terminal targets stamp `finished_at`.
    pub async fn transition<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
        from: ImportJobState,
        to: ImportJobState,
    ) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!(
            "UPDATE import_jobs \
             SET state = $3, \
                 finished_at = CASE WHEN $4 THEN NOW() ELSE finished_at END \
             WHERE id = $1 AND state = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(to.is_terminal())
            .fetch_optional(executor)
            .await
    }

    /// Record a problem found before processing; the job stays where it is.
    pub async fn set_error<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
        error: &str,
    ) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!(
            "UPDATE import_jobs SET error = $2 WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(id)
            .bind(error)
            .fetch_optional(executor)
            .await
    }

    /// `waiting_for_upload -> processing`, fixing the row count.
    pub async fn start_processing<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
        total_rows: i32,
    ) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!(
            "UPDATE import_jobs \
             SET state = $2, total_rows = $3, processed_rows = 0, \
                 upload_completed_at = NOW(), error = NULL \
             WHERE id = $1 AND state = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(id)
            .bind(ImportJobState::Processing.as_str())
            .bind(total_rows)
            .bind(ImportJobState::WaitingForUpload.as_str())
            .fetch_optional(executor)
            .await
    }

    /// Add converted rows to a `processing` job and return the new counters.
    ///
    /// The increment is a single `UPDATE`, so concurrent batches serialize on
    /// the row and exactly one of them observes `processed_rows = total_rows`.
    pub async fn add_processed_rows<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
        rows: i32,
    ) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!(
            "UPDATE import_jobs \
             SET processed_rows = LEAST(processed_rows + $2, total_rows) \
             WHERE id = $1 AND state = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(id)
            .bind(rows)
            .bind(ImportJobState::Processing.as_str())
            .fetch_optional(executor)
            .await
    }

    /// `processing -> rejected` with the reason.
    pub async fn reject<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
        error: &str,
    ) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!(
            "UPDATE import_jobs \
             SET state = $2, error = $3, finished_at = NOW() \
             WHERE id = $1 AND state = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(id)
            .bind(ImportJobState::Rejected.as_str())
            .bind(error)
            .bind(ImportJobState::Processing.as_str())
            .fetch_optional(executor)
            .await
    }
}
