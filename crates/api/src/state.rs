use std::sync::Arc;

use ingestq_events::ChangePublisher;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub pool: ingestq_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Fans database change notifications out to stream clients.
    pub publisher: ChangePublisher,
}
