//! Repository for the `units` table.

use ingestq_core::mapping::UnitRecord;
use ingestq_core::types::DbId;
use sqlx::PgExecutor;

use crate::models::unit::Unit;

const COLUMNS: &str = "\
    id, ident, name, parent_ident, valid_from, valid_to, attributes, \
    import_job_id, created_at, updated_at";

pub struct UnitRepo;

impl UnitRepo {
    /// Insert or replace the unit identified by `record.ident`.
    ///
    /// Idempotent: executing the same batch twice leaves the same rows.
    /// A `parent_ident` with no matching unit fails with a foreign-key
    /// violation.
    pub async fn upsert<'e>(
        executor: impl PgExecutor<'e>,
        record: &UnitRecord,
        import_job_id: DbId,
    ) -> Result<Unit, sqlx::Error> {
        let query = format!(
            "INSERT INTO units \
                 (ident, name, parent_ident, valid_from, valid_to, attributes, import_job_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (ident) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 parent_ident = EXCLUDED.parent_ident, \
                 valid_from = EXCLUDED.valid_from, \
                 valid_to = EXCLUDED.valid_to, \
                 attributes = EXCLUDED.attributes, \
                 import_job_id = EXCLUDED.import_job_id \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Unit>(&query)
            .bind(&record.ident)
            .bind(&record.name)
            .bind(&record.parent_ident)
            .bind(record.valid_from)
            .bind(record.valid_to)
            .bind(serde_json::Value::Object(record.attributes.clone()))
            .bind(import_job_id)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_ident<'e>(
        executor: impl PgExecutor<'e>,
        ident: &str,
    ) -> Result<Option<Unit>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM units WHERE ident = $1");
        sqlx::query_as::<_, Unit>(&query)
            .bind(ident)
            .fetch_optional(executor)
            .await
    }

    /// Number of units last written by a job.
    pub async fn count_for_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM units WHERE import_job_id = $1")
            .bind(job_id)
            .fetch_one(executor)
            .await
    }
}
