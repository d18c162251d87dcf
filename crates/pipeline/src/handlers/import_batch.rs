//! Convert one range of staged rows into units.
//!
//! The whole batch is validated before anything is written, so a batch with
//! bad rows reports all of them at once. Database-level failures (an unknown
//! parent unit) abort on the first offending row.

use ingestq_core::mapping::{map_row, order_parents_first, ValidityWindow};
use ingestq_core::state::ImportJobState;
use ingestq_core::task::ImportBatch;
use ingestq_db::error::{classify, sqlstate, ErrorClass, FOREIGN_KEY_VIOLATION};
use ingestq_db::models::staging_row::RowFailure;
use ingestq_db::repositories::{ImportDefinitionRepo, ImportJobRepo, StagingRowRepo, UnitRepo};
use sqlx::PgConnection;

use crate::error::HandlerError;

pub async fn run(conn: &mut PgConnection, batch: &ImportBatch) -> Result<(), HandlerError> {
    let job = match ImportJobRepo::find_by_id(&mut *conn, batch.job_id).await? {
        Some(job) if job.state == ImportJobState::Processing => job,
        other => {
            tracing::debug!(
                job_id = batch.job_id,
                batch_seq = batch.batch_seq,
                state = ?other.map(|j| j.state),
                "Skipping batch for inactive job",
            );
            return Ok(());
        }
    };

    let definition = ImportDefinitionRepo::find_by_id(&mut *conn, job.definition_id)
        .await?
        .ok_or_else(|| {
            HandlerError::business(format!(
                "Import definition {} no longer exists",
                job.definition_id
            ))
        })?;
    let mapping = definition
        .parsed_mapping()
        .map_err(|e| HandlerError::business(e.to_string()))?;
    let defaults = ValidityWindow {
        valid_from: job.default_valid_from,
        valid_to: job.default_valid_to,
    };

    let rows =
        StagingRowRepo::fetch_range(&mut *conn, job.id, batch.first_row, batch.last_row).await?;
    if rows.len() != batch.row_count() as usize {
        return Err(HandlerError::business(format!(
            "Batch {} expects {} staged rows ({}..={}), found {}",
            batch.batch_seq,
            batch.row_count(),
            batch.first_row,
            batch.last_row,
            rows.len()
        )));
    }

    let mut records = Vec::with_capacity(rows.len());
    let mut failures = Vec::new();
    for row in &rows {
        match map_row(&mapping, &row.data, defaults) {
            Ok(record) => records.push((row.row_no, record)),
            Err(e) => failures.push(RowFailure {
                row_no: row.row_no,
                error: e.to_string(),
            }),
        }
    }
    if !failures.is_empty() {
        return Err(HandlerError::rows(
            format!(
                "{} of {} rows in batch {} are invalid (first: row {}: {})",
                failures.len(),
                rows.len(),
                batch.batch_seq,
                failures[0].row_no,
                failures[0].error
            ),
            failures,
        ));
    }

    for (row_no, record) in order_parents_first(records) {
        if let Err(e) = UnitRepo::upsert(&mut *conn, &record, job.id).await {
            if classify(&e) != ErrorClass::Business {
                return Err(e.into());
            }
            let error = match (sqlstate(&e).as_deref(), &record.parent_ident) {
                (Some(FOREIGN_KEY_VIOLATION), Some(parent)) => {
                    format!("parent unit '{parent}' does not exist")
                }
                _ => e.to_string(),
            };
            return Err(HandlerError::rows(
                format!("Batch {} failed at row {row_no}: {error}", batch.batch_seq),
                vec![RowFailure { row_no, error }],
            ));
        }
    }

    StagingRowRepo::mark_imported(&mut *conn, job.id, batch.first_row, batch.last_row).await?;
    tracing::debug!(
        job_id = job.id,
        batch_seq = batch.batch_seq,
        rows = rows.len(),
        "Batch imported",
    );
    Ok(())
}
