//! Import job rows and the create DTO.

use chrono::NaiveDate;
use ingestq_core::import_job::{JobProgress, MAX_SLUG_LEN, SLUG_PATTERN};
use ingestq_core::state::ImportJobState;
use ingestq_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

/// A row from the `import_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImportJob {
    pub id: DbId,
    pub definition_id: DbId,
    pub slug: String,
    #[sqlx(try_from = "String")]
    pub state: ImportJobState,
    pub total_rows: i32,
    pub processed_rows: i32,
    pub default_valid_from: NaiveDate,
    pub default_valid_to: Option<NaiveDate>,
    pub created_by: String,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub upload_completed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl ImportJob {
    pub fn progress(&self) -> JobProgress {
        JobProgress::new(self.state, self.processed_rows, self.total_rows)
    }
}

/// DTO for creating an import job.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_default_window"))]
pub struct CreateImportJob {
    pub definition_id: DbId,
    #[validate(length(min = 1, max = MAX_SLUG_LEN), regex(path = *SLUG_PATTERN))]
    pub slug: String,
    pub default_valid_from: NaiveDate,
    pub default_valid_to: Option<NaiveDate>,
}

fn validate_default_window(input: &CreateImportJob) -> Result<(), ValidationError> {
    match input.default_valid_to {
        Some(to) if to < input.default_valid_from => {
            let mut err = ValidationError::new("validity_window");
            err.message = Some("default_valid_to must not be before default_valid_from".into());
            Err(err)
        }
        _ => Ok(()),
    }
}
