//! Uploaded rows awaiting conversion.

use ingestq_core::state::StagingRowState;
use ingestq_core::types::DbId;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `staging_rows` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StagingRow {
    pub id: DbId,
    pub job_id: DbId,
    pub row_no: i32,
    pub data: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub state: StagingRowState,
    pub error: Option<String>,
}

/// A staging row that could not be imported, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub row_no: i32,
    pub error: String,
}
