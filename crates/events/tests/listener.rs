//! End-to-end: committed row changes reach subscribers through the
//! database triggers and the listener.

use std::time::Duration;

use assert_matches::assert_matches;
use ingestq_core::backoff::BackoffConfig;
use ingestq_core::task::{Command, TaskCleanup};
use ingestq_db::models::task::EnqueueTask;
use ingestq_db::repositories::TaskRepo;
use ingestq_events::{
    ChangeListener, ChangePublisher, ChangeVerb, EntityType, JobFilter, StreamMessage,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

async fn next_event(sub: &mut ingestq_events::Subscription) -> ingestq_events::ChangeEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), sub.next())
            .await
            .expect("timed out waiting for a change event")
            .expect("subscription closed");
        if let StreamMessage::Event(event) = msg {
            return event;
        }
    }
}

/// Enqueue until the listener delivers an event, returning the event and
/// every other message received on the way.
async fn enqueue_until_delivered(
    pool: &PgPool,
    sub: &mut ingestq_events::Subscription,
) -> (ingestq_events::ChangeEvent, Vec<StreamMessage>) {
    let mut others = Vec::new();
    for _ in 0..50 {
        TaskRepo::enqueue(pool, &EnqueueTask::new(Command::TaskCleanup(TaskCleanup::default())))
            .await
            .unwrap();
        while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(200), sub.next()).await
        {
            match msg {
                StreamMessage::Event(event) => return (event, others),
                other => others.push(other),
            }
        }
    }
    panic!("listener never delivered an event");
}

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn lost_connection_yields_a_single_gap(pool: PgPool) {
    let publisher = ChangePublisher::default();
    let mut sub = publisher.subscribe(JobFilter::all());
    let cancel = CancellationToken::new();
    let listener = ChangeListener::new(pool.clone(), publisher.clone()).with_backoff(fast_backoff());
    let handle = tokio::spawn(listener.run(cancel.clone()));

    let (_, before) = enqueue_until_delivered(&pool, &mut sub).await;
    assert!(before.is_empty());

    let terminated: Vec<bool> = sqlx::query_scalar(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = current_database() AND pid <> pg_backend_pid() \
           AND query ILIKE 'LISTEN%'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert!(!terminated.is_empty(), "no listening backend found");

    let gap = tokio::time::timeout(Duration::from_secs(10), sub.next())
        .await
        .expect("no gap after the connection was lost");
    assert_matches!(gap, Some(StreamMessage::Gap));

    // Events flow again, with no second gap for the same outage.
    let (event, after) = enqueue_until_delivered(&pool, &mut sub).await;
    assert_eq!(event.verb, ChangeVerb::Insert);
    assert!(!after.contains(&StreamMessage::Gap), "duplicate gap: {after:?}");

    cancel.cancel();
    handle.await.unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn task_changes_are_streamed(pool: PgPool) {
    let publisher = ChangePublisher::default();
    let mut sub = publisher.subscribe(JobFilter::all());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(ChangeListener::new(pool.clone(), publisher.clone()).run(cancel.clone()));

    // Wait for LISTEN to be active: enqueue until the first event arrives.
    let mut first = None;
    for _ in 0..50 {
        let task = TaskRepo::enqueue(
            &pool,
            &EnqueueTask::new(Command::TaskCleanup(TaskCleanup::default())),
        )
        .await
        .unwrap();
        if let Ok(Some(StreamMessage::Event(e))) =
            tokio::time::timeout(Duration::from_millis(200), sub.next()).await
        {
            first = Some((task.id, e));
            break;
        }
    }
    let (_, inserted) = first.expect("listener never delivered an event");
    assert_eq!(inserted.verb, ChangeVerb::Insert);
    assert_eq!(inserted.entity_type, EntityType::Task);
    assert_eq!(inserted.snapshot["state"], "pending");
    assert!(inserted.snapshot.get("payload").is_none());

    let claimed = TaskRepo::claim_batch(&pool, 100, "w1").await.unwrap();
    assert!(!claimed.is_empty());
    let update = next_event(&mut sub).await;
    assert_matches!(update.verb, ChangeVerb::Update | ChangeVerb::Insert);

    cancel.cancel();
    handle.await.unwrap();
}
