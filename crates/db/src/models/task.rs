//! Queue task rows.

use ingestq_core::error::CoreError;
use ingestq_core::state::TaskState;
use ingestq_core::task::{Command, DEFAULT_PRIORITY};
use ingestq_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub command: String,
    pub payload: serde_json::Value,
    pub job_id: Option<DbId>,
    #[sqlx(try_from = "String")]
    pub state: TaskState,
    pub priority: i32,
    pub depends_on: Option<DbId>,
    pub attempts: i32,
    pub error: Option<String>,
    #[serde(skip_serializing)]
    pub claim_token: Option<Uuid>,
    pub claimed_by: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Task {
    /// Decode the stored kind tag and payload into a [`Command`].
    pub fn decode_command(&self) -> Result<Command, CoreError> {
        Command::from_parts(&self.command, &self.payload)
    }

    /// Ownership proof for a task in `processing`.
    pub fn claim(&self) -> Option<Claim> {
        match (self.state, self.claim_token) {
            (TaskState::Processing, Some(token)) => Some(Claim {
                task_id: self.id,
                token,
            }),
            _ => None,
        }
    }
}

/// A task id paired with the token minted when it was claimed.
///
/// Every write made on behalf of the claimer is conditioned on the token, so
/// a claim that was reaped and handed to another worker cannot be completed
/// by its previous owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub task_id: DbId,
    pub token: Uuid,
}

/// Input for [`TaskRepo::enqueue`](crate::repositories::TaskRepo::enqueue).
#[derive(Debug, Clone)]
pub struct EnqueueTask {
    pub command: Command,
    pub priority: i32,
    pub depends_on: Option<DbId>,
}

impl EnqueueTask {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            priority: DEFAULT_PRIORITY,
            depends_on: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, task_id: DbId) -> Self {
        self.depends_on = Some(task_id);
        self
    }
}

/// Number of tasks in one state.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskStateCount {
    #[sqlx(try_from = "String")]
    pub state: TaskState,
    pub count: i64,
}

/// What the worker pool is busy with, derived from live task rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct WorkerStatus {
    pub is_importing: bool,
    pub is_deriving: bool,
    pub pending: i64,
    pub processing: i64,
}
