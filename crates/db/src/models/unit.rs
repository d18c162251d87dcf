//! Units produced by imports.

use chrono::NaiveDate;
use ingestq_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `units` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Unit {
    pub id: DbId,
    pub ident: String,
    pub name: String,
    pub parent_ident: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub attributes: serde_json::Value,
    pub import_job_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
