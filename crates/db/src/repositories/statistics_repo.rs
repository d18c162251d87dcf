//! Repository for the `import_job_statistics` table.

use ingestq_core::types::DbId;
use sqlx::PgExecutor;

use crate::models::statistics::ImportJobStatistics;

pub struct StatisticsRepo;

impl StatisticsRepo {
    /// Recompute and store a job's statistics from its units.
    pub async fn refresh<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<ImportJobStatistics, sqlx::Error> {
        sqlx::query_as::<_, ImportJobStatistics>(
            "INSERT INTO import_job_statistics (job_id, unit_count, root_count, child_count) \
             SELECT $1, \
                    COUNT(*), \
                    COUNT(*) FILTER (WHERE parent_ident IS NULL), \
                    COUNT(*) FILTER (WHERE parent_ident IS NOT NULL) \
             FROM units WHERE import_job_id = $1 \
             ON CONFLICT (job_id) DO UPDATE SET \
                 unit_count = EXCLUDED.unit_count, \
                 root_count = EXCLUDED.root_count, \
                 child_count = EXCLUDED.child_count, \
                 computed_at = NOW() \
             RETURNING job_id, unit_count, root_count, child_count, computed_at",
        )
        .bind(job_id)
        .fetch_one(executor)
        .await
    }

    pub async fn find<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<Option<ImportJobStatistics>, sqlx::Error> {
        sqlx::query_as::<_, ImportJobStatistics>(
            "SELECT job_id, unit_count, root_count, child_count, computed_at \
             FROM import_job_statistics WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(executor)
        .await
    }
}
