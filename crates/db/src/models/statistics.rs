//! Aggregate statistics computed once an import has converted every row.

use ingestq_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `import_job_statistics` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImportJobStatistics {
    pub job_id: DbId,
    pub unit_count: i64,
    pub root_count: i64,
    pub child_count: i64,
    pub computed_at: Timestamp,
}
