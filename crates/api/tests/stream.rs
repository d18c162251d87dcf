//! Import job progress stream.

mod common;

use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use chrono::Utc;
use ingestq_core::types::DbId;
use ingestq_events::{ChangeEvent, ChangeVerb, EntityType};
use serde_json::json;
use sqlx::PgPool;

use common::{
    assert_status, assert_stream_ends, body_json, build_test_app, create_job, get, next_frame,
};

fn job_update(job_id: DbId, processed_rows: i32) -> ChangeEvent {
    job_state_change(job_id, "processing", processed_rows)
}

fn job_state_change(job_id: DbId, state: &str, processed_rows: i32) -> ChangeEvent {
    ChangeEvent {
        verb: ChangeVerb::Update,
        entity_type: EntityType::ImportJob,
        entity_id: job_id,
        job_id: Some(job_id),
        snapshot: json!({"id": job_id, "state": state, "processed_rows": processed_rows}),
        occurred_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn missing_ids_is_400_json(pool: PgPool) {
    let (app, _) = build_test_app(pool, Duration::from_secs(30));
    let response = get(app, "/api/v1/import-jobs/stream").await;

    assert_status(&response, StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["error"].as_str().unwrap().contains("ids"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn malformed_ids_is_400_json(pool: PgPool) {
    let (app, _) = build_test_app(pool, Duration::from_secs(30));
    let response = get(app, "/api/v1/import-jobs/stream?ids=1,two").await;

    assert_status(&response, StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn stream_starts_with_snapshots(pool: PgPool) {
    let first = create_job(&pool, "stream_a").await;
    let second = create_job(&pool, "stream_b").await;
    let (app, publisher) = build_test_app(pool, Duration::from_secs(30));

    let response = get(app, &format!("/api/v1/import-jobs/stream?ids={first},{second},999")).await;

    assert_status(&response, StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
    assert_eq!(publisher.subscriber_count(), 1);

    let mut body = response.into_body();
    let one = next_frame(&mut body).await;
    let two = next_frame(&mut body).await;
    assert!(one.starts_with("event: snapshot\n"));
    assert!(one.contains(&format!("\"id\":{first}")));
    assert!(one.contains("\"state\":\"created\""));
    assert!(two.contains(&format!("\"id\":{second}")));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn stream_delivers_only_requested_jobs(pool: PgPool) {
    let watched = create_job(&pool, "stream_w").await;
    let other = create_job(&pool, "stream_o").await;
    let (app, publisher) = build_test_app(pool, Duration::from_secs(30));

    let response = get(app, &format!("/api/v1/import-jobs/stream?ids={watched}")).await;
    let mut body = response.into_body();
    next_frame(&mut body).await;

    publisher.publish(job_update(other, 10));
    publisher.publish(job_update(watched, 20));

    let frame = next_frame(&mut body).await;
    assert!(frame.starts_with("event: change\n"));
    assert!(frame.contains(&format!("\"entity_id\":{watched}")));
    assert!(frame.contains("\"processed_rows\":20"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn idle_stream_sends_heartbeat(pool: PgPool) {
    let job = create_job(&pool, "stream_h").await;
    let (app, _publisher) = build_test_app(pool, Duration::from_millis(100));

    let response = get(app, &format!("/api/v1/import-jobs/stream?ids={job}")).await;
    let mut body = response.into_body();
    next_frame(&mut body).await;

    assert!(next_frame(&mut body).await.starts_with("event: heartbeat\n"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn gap_tells_client_to_refetch(pool: PgPool) {
    let job = create_job(&pool, "stream_g").await;
    let (app, publisher) = build_test_app(pool, Duration::from_secs(30));

    let response = get(app, &format!("/api/v1/import-jobs/stream?ids={job}")).await;
    let mut body = response.into_body();
    next_frame(&mut body).await;

    publisher.publish_gap();
    let frame = next_frame(&mut body).await;
    assert!(frame.starts_with("event: gap\n"));
    assert!(frame.contains("refetch"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn closing_the_stream_unsubscribes(pool: PgPool) {
    let job = create_job(&pool, "stream_c").await;
    let (app, publisher) = build_test_app(pool, Duration::from_secs(30));

    let response = get(app, &format!("/api/v1/import-jobs/stream?ids={job}")).await;
    assert_eq!(publisher.subscriber_count(), 1);
    drop(response);

    assert_eq!(publisher.subscriber_count(), 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn stream_ends_once_every_job_is_done(pool: PgPool) {
    let finishing = create_job(&pool, "stream_f").await;
    let rejecting = create_job(&pool, "stream_r").await;
    let (app, publisher) = build_test_app(pool, Duration::from_secs(30));

    let response = get(
        app,
        &format!("/api/v1/import-jobs/stream?ids={finishing},{rejecting}"),
    )
    .await;
    let mut body = response.into_body();
    next_frame(&mut body).await;
    next_frame(&mut body).await;

    publisher.publish(job_state_change(finishing, "finished", 5));
    assert!(next_frame(&mut body).await.contains("\"state\":\"finished\""));
    assert_eq!(publisher.subscriber_count(), 1);

    publisher.publish(job_state_change(rejecting, "rejected", 2));
    assert!(next_frame(&mut body).await.contains("\"state\":\"rejected\""));
    assert_stream_ends(&mut body).await;
    assert_eq!(publisher.subscriber_count(), 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn stream_of_terminal_jobs_ends_after_snapshots(pool: PgPool) {
    let job = create_job(&pool, "stream_t").await;
    sqlx::query("UPDATE import_jobs SET state = 'deleted' WHERE id = $1")
        .bind(job)
        .execute(&pool)
        .await
        .unwrap();
    let (app, _publisher) = build_test_app(pool, Duration::from_secs(30));

    let response = get(app, &format!("/api/v1/import-jobs/stream?ids={job}")).await;
    let mut body = response.into_body();

    assert!(next_frame(&mut body).await.contains("\"state\":\"deleted\""));
    assert_stream_ends(&mut body).await;
}
