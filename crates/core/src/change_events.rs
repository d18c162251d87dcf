//! Names shared by the database triggers, the notification listener and
//! the streaming endpoint.

/// `pg_notify` channel written by the `tasks` and `import_jobs` triggers.
pub const CHANGE_CHANNEL: &str = "ingestq_change";

/// Entity type tag for task notifications.
pub const ENTITY_TASK: &str = "task";

/// Entity type tag for import job notifications.
pub const ENTITY_IMPORT_JOB: &str = "import_job";

/// SSE event name for a row change.
pub const SSE_EVENT_CHANGE: &str = "change";

/// SSE event name for an idle-stream heartbeat.
pub const SSE_EVENT_HEARTBEAT: &str = "heartbeat";

/// SSE event name when buffered events were dropped for a slow client.
pub const SSE_EVENT_LAGGED: &str = "lagged";

/// SSE event name when the upstream notification connection was lost.
pub const SSE_EVENT_GAP: &str = "gap";

/// SSE event name for the initial per-job snapshot.
pub const SSE_EVENT_SNAPSHOT: &str = "snapshot";
