//! Change events as emitted by the notification triggers.

use chrono::{DateTime, Utc};
use ingestq_core::change_events::{
    SSE_EVENT_CHANGE, SSE_EVENT_GAP, SSE_EVENT_HEARTBEAT, SSE_EVENT_LAGGED,
};
use ingestq_core::types::DbId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeVerb {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    ImportJob,
}

/// One row change.
///
/// `job_id` is the owning import job for tasks and the job itself for
/// import jobs; housekeeping tasks have none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub verb: ChangeVerb,
    pub entity_type: EntityType,
    pub entity_id: DbId,
    pub job_id: Option<DbId>,
    /// Row image without large payloads.
    pub snapshot: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Decode a `pg_notify` payload.
    pub fn from_notification(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Event(ChangeEvent),
    /// Nothing happened for a heartbeat interval.
    Heartbeat,
    /// The subscriber fell behind and `missed` of its oldest events were dropped.
    Lagged { missed: u64 },
    /// The upstream notification connection was lost; events may be missing.
    Gap,
}

impl StreamMessage {
    /// SSE event name for this message.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamMessage::Event(_) => SSE_EVENT_CHANGE,
            StreamMessage::Heartbeat => SSE_EVENT_HEARTBEAT,
            StreamMessage::Lagged { .. } => SSE_EVENT_LAGGED,
            StreamMessage::Gap => SSE_EVENT_GAP,
        }
    }

    /// JSON body for this message.
    pub fn data(&self) -> serde_json::Value {
        match self {
            StreamMessage::Event(event) => serde_json::to_value(event).unwrap_or_default(),
            StreamMessage::Heartbeat => serde_json::json!({ "at": Utc::now() }),
            StreamMessage::Lagged { missed } => serde_json::json!({ "missed": missed }),
            StreamMessage::Gap => serde_json::json!({ "refetch": true }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_trigger_payload() {
        let payload = r#"{
            "verb": "update",
            "entity_type": "import_job",
            "entity_id": 12,
            "job_id": 12,
            "snapshot": {"id": 12, "state": "processing", "processed_rows": 40, "total_rows": 100},
            "occurred_at": "2026-03-01T10:15:00.123456+00:00"
        }"#;

        let event = ChangeEvent::from_notification(payload).unwrap();
        assert_eq!(event.verb, ChangeVerb::Update);
        assert_eq!(event.entity_type, EntityType::ImportJob);
        assert_eq!(event.job_id, Some(12));
        assert_eq!(event.snapshot["processed_rows"], 40);
    }

    #[test]
    fn housekeeping_task_has_no_job() {
        let payload = r#"{"verb":"insert","entity_type":"task","entity_id":3,"job_id":null,
            "snapshot":{},"occurred_at":"2026-03-01T10:15:00Z"}"#;
        let event = ChangeEvent::from_notification(payload).unwrap();
        assert_eq!(event.job_id, None);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(ChangeEvent::from_notification("{\"verb\":\"upsert\"}").is_err());
    }

    #[test]
    fn event_names() {
        assert_eq!(StreamMessage::Heartbeat.event_name(), "heartbeat");
        assert_eq!(StreamMessage::Gap.event_name(), "gap");
        assert_eq!(StreamMessage::Lagged { missed: 3 }.data()["missed"], 3);
    }
}
