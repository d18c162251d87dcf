//! Repository for the `staging_rows` table.

use ingestq_core::state::StagingRowState;
use ingestq_core::types::DbId;
use sqlx::PgExecutor;

use crate::models::staging_row::StagingRow;

const COLUMNS: &str = "id, job_id, row_no, data, state, error";

/// Provides access to a job's uploaded rows.
pub struct StagingRowRepo;

impl StagingRowRepo {
    /// Append rows after the job's current last `row_no`. Returns the
    /// number inserted.
    ///
    /// Callers serialize appends per job (the controller holds the job row
    /// lock), so numbering stays gap-free.
    pub async fn append<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        rows: &[serde_json::Value],
    ) -> Result<u64, sqlx::Error> {
        if rows.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO staging_rows (job_id, row_no, data) \
             SELECT $1, \
                    (SELECT COALESCE(MAX(row_no), 0) FROM staging_rows WHERE job_id = $1) \
                        + staged.ord::INTEGER, \
                    staged.data \
             FROM UNNEST($2::JSONB[]) WITH ORDINALITY AS staged(data, ord)",
        )
        .bind(job_id)
        .bind(rows)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Number of rows staged for a job.
    pub async fn count<'e>(executor: impl PgExecutor<'e>, job_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM staging_rows WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(executor)
            .await
    }

    /// Rows `first_row..=last_row` of a job, in row order.
    pub async fn fetch_range<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        first_row: i32,
        last_row: i32,
    ) -> Result<Vec<StagingRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM staging_rows \
             WHERE job_id = $1 AND row_no BETWEEN $2 AND $3 \
             ORDER BY row_no"
        );
        sqlx::query_as::<_, StagingRow>(&query)
            .bind(job_id)
            .bind(first_row)
            .bind(last_row)
            .fetch_all(executor)
            .await
    }

    /// Mark a range of rows as imported.
    pub async fn mark_imported<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        first_row: i32,
        last_row: i32,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE staging_rows SET state = $4, error = NULL \
             WHERE job_id = $1 AND row_no BETWEEN $2 AND $3",
        )
        .bind(job_id)
        .bind(first_row)
        .bind(last_row)
        .bind(StagingRowState::Imported.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Record why a row could not be imported.
    pub async fn mark_error<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        row_no: i32,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE staging_rows SET state = $3, error = $4 \
             WHERE job_id = $1 AND row_no = $2",
        )
        .bind(job_id)
        .bind(row_no)
        .bind(StagingRowState::Error.as_str())
        .bind(error)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Rows of a job that failed to import.
    pub async fn list_errors<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<Vec<StagingRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM staging_rows \
             WHERE job_id = $1 AND state = $2 \
             ORDER BY row_no"
        );
        sqlx::query_as::<_, StagingRow>(&query)
            .bind(job_id)
            .bind(StagingRowState::Error.as_str())
            .fetch_all(executor)
            .await
    }

    /// Drop every staged row of a job.
    pub async fn delete_for_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM staging_rows WHERE job_id = $1")
            .bind(job_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
