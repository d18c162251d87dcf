//! Live import job progress over server-sent events.
//!
//! The client names the jobs it wants in `ids`. It first receives one
//! `snapshot` event per existing job, then `change` events for those jobs as
//! they commit. `heartbeat` marks an idle stream; `lagged` and `gap` mean
//! events were lost and the client should re-fetch.
//!
//! The stream ends after every followed job is finished, rejected or
//! deleted. Requested ids that do not exist are not followed.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use ingestq_core::change_events::SSE_EVENT_SNAPSHOT;
use ingestq_core::types::DbId;
use ingestq_core::state::ImportJobState;
use ingestq_db::models::import_job::ImportJob;
use ingestq_db::repositories::ImportJobRepo;
use ingestq_events::{ChangeEvent, ChangeVerb, EntityType, JobFilter, StreamMessage, Subscription};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Most jobs one stream may follow.
const MAX_STREAM_JOBS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Comma-separated job ids.
    pub ids: Option<String>,
}

/// GET /api/v1/import-jobs/stream?ids=1,2
pub async fn stream_jobs(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let ids = parse_ids(params.ids.as_deref())?;

    // Subscribe before reading snapshots so no commit falls between them.
    let subscription = state.publisher.subscribe(JobFilter::jobs(ids.iter().copied()));
    let jobs = ImportJobRepo::list_by_ids(&state.pool, &ids).await?;
    tracing::info!(
        subscriber = subscription.id(),
        requested = ids.len(),
        found = jobs.len(),
        "Progress stream opened",
    );

    let snapshots: Vec<Event> = jobs.iter().filter_map(snapshot_event).collect();
    let open = OpenJobs::from_snapshots(&jobs);
    let stream = futures::stream::iter(snapshots)
        .chain(live_events(subscription, open))
        .map(Ok);

    Ok(Sse::new(stream))
}

/// Forward subscription messages until no followed job is still open.
fn live_events(subscription: Subscription, open: OpenJobs) -> impl Stream<Item = Event> + Send {
    futures::stream::unfold((subscription, open), |(mut subscription, mut open)| async move {
        if open.is_empty() {
            tracing::info!(subscriber = subscription.id(), "All followed jobs done, closing stream");
            return None;
        }
        let message = subscription.next().await?;
        if let StreamMessage::Event(event) = &message {
            open.observe(event);
        }
        Some((message_event(&message), (subscription, open)))
    })
}

/// Followed jobs that have not reached a terminal state.
#[derive(Debug, Default)]
struct OpenJobs(HashSet<DbId>);

impl OpenJobs {
    fn from_snapshots(jobs: &[ImportJob]) -> Self {
        Self(
            jobs.iter()
                .filter(|job| !job.state.is_terminal())
                .map(|job| job.id)
                .collect(),
        )
    }

    fn observe(&mut self, event: &ChangeEvent) {
        if event.entity_type != EntityType::ImportJob {
            return;
        }
        let done = event.verb == ChangeVerb::Delete
            || event.snapshot["state"]
                .as_str()
                .and_then(|state| state.parse::<ImportJobState>().ok())
                .is_some_and(ImportJobState::is_terminal);
        if done {
            self.0.remove(&event.entity_id);
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn snapshot_event(job: &ImportJob) -> Option<Event> {
    match serde_json::to_string(job) {
        Ok(data) => Some(Event::default().event(SSE_EVENT_SNAPSHOT).data(data)),
        Err(e) => {
            tracing::error!(job_id = job.id, error = %e, "Could not encode job snapshot");
            None
        }
    }
}

fn message_event(message: &StreamMessage) -> Event {
    Event::default()
        .event(message.event_name())
        .data(message.data().to_string())
}

/// Parse `ids`: required, comma-separated positive integers.
fn parse_ids(raw: Option<&str>) -> AppResult<Vec<DbId>> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Query parameter 'ids' is required".into()))?;

    let mut ids = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        let id = part
            .parse::<DbId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid job id '{part}'")))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.len() > MAX_STREAM_JOBS {
        return Err(AppError::BadRequest(format!(
            "At most {MAX_STREAM_JOBS} jobs can be streamed at once"
        )));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn job_event(job_id: DbId, verb: ChangeVerb, state: &str) -> ChangeEvent {
        ChangeEvent {
            verb,
            entity_type: EntityType::ImportJob,
            entity_id: job_id,
            job_id: Some(job_id),
            snapshot: serde_json::json!({"id": job_id, "state": state}),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn jobs_close_on_terminal_state_or_delete() {
        let mut open = OpenJobs(HashSet::from([1, 2, 3]));

        open.observe(&job_event(1, ChangeVerb::Update, "processing"));
        open.observe(&job_event(1, ChangeVerb::Update, "finished"));
        open.observe(&job_event(2, ChangeVerb::Delete, "waiting_for_upload"));
        assert_eq!(open.0, HashSet::from([3]));

        open.observe(&job_event(3, ChangeVerb::Update, "rejected"));
        assert!(open.is_empty());
    }

    #[test]
    fn task_events_do_not_close_jobs() {
        let mut open = OpenJobs(HashSet::from([1]));
        let mut event = job_event(1, ChangeVerb::Update, "finished");
        event.entity_type = EntityType::Task;
        event.entity_id = 40;

        open.observe(&event);
        assert!(!open.is_empty());
    }

    #[test]
    fn parses_and_dedupes_ids() {
        assert_eq!(parse_ids(Some("3, 1,3")).unwrap(), vec![3, 1]);
    }

    #[test]
    fn missing_ids_is_rejected() {
        assert!(parse_ids(None).is_err());
        assert!(parse_ids(Some("  ")).is_err());
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(parse_ids(Some("1,abc")).is_err());
        assert!(parse_ids(Some("1,,2")).is_err());
        assert!(parse_ids(Some("-4")).is_err());
    }

    #[test]
    fn too_many_ids_are_rejected() {
        let raw = (1..=101).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        assert!(parse_ids(Some(&raw)).is_err());
    }
}
