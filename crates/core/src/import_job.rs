//! Pure rules for import jobs: slugs, batch planning and progress
//! reporting.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::CoreError;
use crate::state::ImportJobState;

/// Maximum length of an import job or definition slug.
pub const MAX_SLUG_LEN: u64 = 64;

/// Fallback batch size when a definition does not set one.
pub const DEFAULT_BATCH_SIZE: i32 = 1000;

/// Upper bound on rows per batch; one batch is one transaction.
pub const MAX_BATCH_SIZE: i32 = 50_000;

/// Lowercase letters, digits and underscores, starting with a letter.
pub static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("slug pattern is valid"));

/// Validate a definition's batch size.
pub fn validate_batch_size(batch_size: i32) -> Result<(), CoreError> {
    if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
        return Err(CoreError::Validation(format!(
            "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {batch_size}"
        )));
    }
    Ok(())
}

/// One planned batch: `(batch_seq, first_row, last_row)`, rows inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    pub batch_seq: i32,
    pub first_row: i32,
    pub last_row: i32,
}

/// Split `total_rows` (numbered `1..=total_rows`) into consecutive ranges
/// of at most `batch_size` rows.
pub fn plan_batches(total_rows: i32, batch_size: i32) -> Vec<BatchRange> {
    if total_rows <= 0 {
        return Vec::new();
    }
    let size = batch_size.max(1);
    let mut ranges = Vec::with_capacity(((total_rows + size - 1) / size) as usize);
    let mut first = 1;
    let mut seq = 1;
    while first <= total_rows {
        let last = (first + size - 1).min(total_rows);
        ranges.push(BatchRange {
            batch_seq: seq,
            first_row: first,
            last_row: last,
        });
        first = last + 1;
        seq += 1;
    }
    ranges
}

/// Progress snapshot for a job, available before it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub state: ImportJobState,
    pub processed_rows: i32,
    pub total_rows: i32,
    /// `0.0..=100.0`; `None` until the upload completed and rows are known.
    pub percent: Option<f64>,
}

impl JobProgress {
    pub fn new(state: ImportJobState, processed_rows: i32, total_rows: i32) -> Self {
        Self {
            state,
            processed_rows,
            total_rows,
            percent: progress_percent(state, processed_rows, total_rows),
        }
    }
}

/// Percentage of rows converted so far.
///
/// A finished job is always 100%, even with zero rows. Before the upload
/// completes the total is unknown and the result is `None`.
pub fn progress_percent(state: ImportJobState, processed_rows: i32, total_rows: i32) -> Option<f64> {
    match state {
        ImportJobState::Created | ImportJobState::WaitingForUpload => None,
        ImportJobState::Finished => Some(100.0),
        _ if total_rows <= 0 => Some(0.0),
        _ => {
            let pct = processed_rows as f64 * 100.0 / total_rows as f64;
            Some((pct * 100.0).round() / 100.0)
        }
    }
}
