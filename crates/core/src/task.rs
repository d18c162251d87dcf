//! Queue commands: the closed set of operations a task can carry.
//!
//! A [`Command`] is stored as two columns, the `command` kind tag and a
//! `payload` JSON object, and reassembled with [`Command::from_parts`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Default priority for enqueued tasks. Higher values are claimed first.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Priority for statistics derivation, so a completed import is finalised
/// ahead of other jobs' remaining batches.
pub const DERIVE_PRIORITY: i32 = 10;

/// Priority for retention sweeps; housekeeping yields to imports.
pub const CLEANUP_PRIORITY: i32 = -10;

/// Default retention window for terminal tasks (7 days).
pub const DEFAULT_TASK_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

/// Convert one contiguous range of staged rows into units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub job_id: DbId,
    /// 1-based position of this batch within the job.
    pub batch_seq: i32,
    /// First staging `row_no` covered (inclusive).
    pub first_row: i32,
    /// Last staging `row_no` covered (inclusive).
    pub last_row: i32,
}

impl ImportBatch {
    pub fn row_count(&self) -> i32 {
        self.last_row - self.first_row + 1
    }
}

/// Recompute the aggregate statistics of a job once every batch succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriveStatistics {
    pub job_id: DbId,
}

/// Delete terminal tasks older than the retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCleanup {
    pub retention_secs: i64,
}

impl Default for TaskCleanup {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_TASK_RETENTION_SECS,
        }
    }
}

/// Every operation the queue can execute, each with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum Command {
    ImportBatch(ImportBatch),
    DeriveStatistics(DeriveStatistics),
    TaskCleanup(TaskCleanup),
}

impl Command {
    /// The kind tag stored in the `tasks.command` column.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ImportBatch(_) => "import_batch",
            Command::DeriveStatistics(_) => "derive_statistics",
            Command::TaskCleanup(_) => "task_cleanup",
        }
    }

    /// The import job this command works on, if any.
    pub fn job_id(&self) -> Option<DbId> {
        match self {
            Command::ImportBatch(batch) => Some(batch.job_id),
            Command::DeriveStatistics(derive) => Some(derive.job_id),
            Command::TaskCleanup(_) => None,
        }
    }

    /// The payload object stored in the `tasks.payload` column.
    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            Command::ImportBatch(p) => serde_json::to_value(p),
            Command::DeriveStatistics(p) => serde_json::to_value(p),
            Command::TaskCleanup(p) => serde_json::to_value(p),
        };
        // Plain structs of integers always serialize.
        value.unwrap_or_default()
    }

    /// Rebuild a command from its stored kind tag and payload.
    pub fn from_parts(kind: &str, payload: &serde_json::Value) -> Result<Self, CoreError> {
        let decoded = match kind {
            "import_batch" => serde_json::from_value(payload.clone()).map(Command::ImportBatch),
            "derive_statistics" => {
                serde_json::from_value(payload.clone()).map(Command::DeriveStatistics)
            }
            "task_cleanup" => serde_json::from_value(payload.clone()).map(Command::TaskCleanup),
            other => {
                return Err(CoreError::Validation(format!("Unknown command '{other}'")));
            }
        };
        decoded.map_err(|e| CoreError::Validation(format!("Malformed {kind} payload: {e}")))
    }
}
