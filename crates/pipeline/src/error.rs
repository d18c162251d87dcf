use ingestq_core::error::CoreError;
use ingestq_db::error::{classify, ErrorClass};
use ingestq_db::models::staging_row::RowFailure;

/// Errors returned by engine and controller operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Core(_) => ErrorClass::Business,
            PipelineError::Database(e) => classify(e),
        }
    }

    /// A lock conflict, deadlock or timeout: retry later, never a task failure.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Connectivity lost: reconnect before doing anything else.
    pub fn is_infrastructure(&self) -> bool {
        self.class() == ErrorClass::Infrastructure
    }
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        PipelineError::Core(CoreError::Validation(errors.to_string()))
    }
}

/// Errors returned by command handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The command cannot succeed with this data. The task fails and its
    /// job is rejected; `rows` are recorded on the staging rows.
    #[error("{message}")]
    Business {
        message: String,
        rows: Vec<RowFailure>,
    },

    /// Classified by the engine with [`classify`].
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl HandlerError {
    pub fn business(message: impl Into<String>) -> Self {
        HandlerError::Business {
            message: message.into(),
            rows: Vec::new(),
        }
    }

    pub fn rows(message: impl Into<String>, rows: Vec<RowFailure>) -> Self {
        HandlerError::Business {
            message: message.into(),
            rows,
        }
    }
}
