#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::NaiveDate;
use http_body_util::BodyExt;
use ingestq_core::types::{CallerIdentity, DbId};
use ingestq_db::models::import_definition::CreateImportDefinition;
use ingestq_db::models::import_job::CreateImportJob;
use ingestq_db::repositories::{ImportDefinitionRepo, ImportJobRepo};
use ingestq_events::{ChangePublisher, PublisherConfig};
use serde_json::json;
use sqlx::PgPool;
use tower::ServiceExt;

use ingestq_api::config::ServerConfig;
use ingestq_api::router::build_app_router;
use ingestq_api::state::AppState;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        heartbeat_interval_secs: 30,
        subscriber_buffer: 16,
    }
}

/// Build the production router over `pool`, returning the publisher so a
/// test can inject change events.
pub fn build_test_app(pool: PgPool, heartbeat: Duration) -> (Router, ChangePublisher) {
    let config = test_config();
    let publisher = ChangePublisher::new(PublisherConfig {
        buffer: config.subscriber_buffer,
        heartbeat_interval: heartbeat,
    });
    let state = AppState {
        pool,
        config: Arc::new(config),
        publisher: publisher.clone(),
    };
    (build_app_router(state).unwrap(), publisher)
}

/// Insert a definition and a job in `created` state, returning the job id.
pub async fn create_job(pool: &PgPool, slug: &str) -> DbId {
    let definition = ImportDefinitionRepo::create(
        pool,
        &CreateImportDefinition {
            slug: format!("{slug}_def"),
            name: "Units".into(),
            mapping: json!({"ident": "id", "name": "name"}),
            batch_size: None,
        },
    )
    .await
    .unwrap();
    ImportJobRepo::create(
        pool,
        &CreateImportJob {
            definition_id: definition.id,
            slug: slug.into(),
            default_valid_from: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            default_valid_to: None,
        },
        &CallerIdentity::new("viewer"),
    )
    .await
    .unwrap()
    .id
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}

/// Read the next SSE frame as text, failing after two seconds.
pub async fn next_frame(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("no SSE frame within 2s")
        .expect("stream ended")
        .unwrap();
    let data: Bytes = frame.into_data().unwrap();
    String::from_utf8(data.to_vec()).unwrap()
}

/// Assert the SSE body ends within two seconds.
pub async fn assert_stream_ends(body: &mut Body) {
    let next = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("stream still open after 2s");
    assert!(next.is_none(), "expected end of stream, got another frame");
}
