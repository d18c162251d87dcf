pub mod health;
pub mod stream;
pub mod worker_status;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /import-jobs/stream?ids=1,2     live job progress (SSE)
/// /worker-status                  what the workers are busy with
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/import-jobs/stream", get(stream::stream_jobs))
        .route("/worker-status", get(worker_status::get_worker_status))
}
