//! Import definitions: reusable column mappings.

use ingestq_core::error::CoreError;
use ingestq_core::import_job::{MAX_BATCH_SIZE, MAX_SLUG_LEN, SLUG_PATTERN};
use ingestq_core::mapping::{parse_mapping, ImportMapping};
use ingestq_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `import_definitions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImportDefinition {
    pub id: DbId,
    pub slug: String,
    pub name: String,
    pub mapping: serde_json::Value,
    pub batch_size: i32,
    pub created_at: Timestamp,
}

impl ImportDefinition {
    /// Parse and validate the stored mapping.
    pub fn parsed_mapping(&self) -> Result<ImportMapping, CoreError> {
        parse_mapping(&self.mapping)
    }
}

/// DTO for creating a definition.
///
/// The mapping is stored as given; it is validated when a job is created
/// against the definition so that a bad mapping is reported on the job.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateImportDefinition {
    #[validate(length(min = 1, max = MAX_SLUG_LEN), regex(path = *SLUG_PATTERN))]
    pub slug: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub mapping: serde_json::Value,
    #[validate(range(min = 1, max = MAX_BATCH_SIZE))]
    pub batch_size: Option<i32>,
}
