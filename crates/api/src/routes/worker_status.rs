use axum::extract::State;
use axum::Json;
use ingestq_db::models::task::WorkerStatus;
use ingestq_db::repositories::TaskRepo;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/worker-status -- whether workers are importing or deriving
/// statistics, with live task counts.
pub async fn get_worker_status(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<WorkerStatus>>> {
    let status = TaskRepo::worker_status(&state.pool).await?;
    Ok(Json(DataResponse { data: status }))
}
