//! Command handlers.
//!
//! A handler runs inside the executing task's savepoint. Returning `Ok`
//! keeps its writes; any error discards them. Handlers must be idempotent:
//! a task can run again after a crash or a reaped claim.

pub mod derive_statistics;
pub mod import_batch;
pub mod task_cleanup;

use ingestq_core::task::Command;
use sqlx::PgConnection;

use crate::error::HandlerError;

/// Dispatch a command to its handler.
pub async fn run(conn: &mut PgConnection, command: &Command) -> Result<(), HandlerError> {
    match command {
        Command::ImportBatch(batch) => import_batch::run(conn, batch).await,
        Command::DeriveStatistics(derive) => derive_statistics::run(conn, derive).await,
        Command::TaskCleanup(cleanup) => task_cleanup::run(conn, cleanup).await,
    }
}
