use ingestq_core::state::ImportJobState;
use ingestq_core::task::DeriveStatistics;
use ingestq_db::repositories::{ImportJobRepo, StatisticsRepo};
use sqlx::PgConnection;

use crate::error::HandlerError;

/// Recompute a job's unit statistics. No-op when the job is gone or no
/// longer processing.
pub async fn run(conn: &mut PgConnection, derive: &DeriveStatistics) -> Result<(), HandlerError> {
    let job = ImportJobRepo::find_by_id(&mut *conn, derive.job_id).await?;
    match job {
        Some(job) if job.state == ImportJobState::Processing => {}
        other => {
            tracing::debug!(
                job_id = derive.job_id,
                state = ?other.map(|j| j.state),
                "Skipping statistics for inactive job",
            );
            return Ok(());
        }
    }

    let stats = StatisticsRepo::refresh(&mut *conn, derive.job_id).await?;
    tracing::info!(
        job_id = derive.job_id,
        units = stats.unit_count,
        roots = stats.root_count,
        "Import statistics derived",
    );
    Ok(())
}
