use ingestq_core::task::TaskCleanup;
use ingestq_db::repositories::TaskRepo;
use sqlx::PgConnection;

use crate::error::HandlerError;

/// Delete terminal tasks past the retention window.
pub async fn run(conn: &mut PgConnection, cleanup: &TaskCleanup) -> Result<(), HandlerError> {
    let deleted = TaskRepo::cleanup(&mut *conn, cleanup.retention_secs).await?;
    tracing::info!(
        deleted,
        retention_secs = cleanup.retention_secs,
        "Task retention sweep complete",
    );
    Ok(())
}
