//! Health endpoint and general HTTP behaviour.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{assert_status, body_json, build_test_app, get};
use sqlx::PgPool;

#[sqlx::test(migrations = "../../db/migrations")]
async fn health_check_reports_database(pool: PgPool) {
    let (app, _) = build_test_app(pool, Duration::from_secs(30));
    let response = get(app, "/health").await;

    assert_status(&response, StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["db_healthy"], true);
    assert_eq!(json["subscribers"], 0);
    assert!(json["version"].is_string());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn closed_pool_is_degraded(pool: PgPool) {
    let (app, _) = build_test_app(pool.clone(), Duration::from_secs(30));
    pool.close().await;

    let response = get(app, "/health").await;

    assert_status(&response, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_route_returns_404(pool: PgPool) {
    let (app, _) = build_test_app(pool, Duration::from_secs(30));
    let response = get(app, "/this-route-does-not-exist").await;

    assert_status(&response, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn response_carries_request_id(pool: PgPool) {
    let (app, _) = build_test_app(pool, Duration::from_secs(30));
    let response = get(app, "/health").await;

    let request_id = response.headers().get("x-request-id").unwrap();
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}
