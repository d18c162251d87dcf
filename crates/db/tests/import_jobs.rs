//! Integration tests for import definitions, jobs, staging rows and units.

use assert_matches::assert_matches;
use chrono::NaiveDate;
use ingestq_core::mapping::UnitRecord;
use ingestq_core::state::{ImportJobState, StagingRowState};
use ingestq_core::types::CallerIdentity;
use ingestq_db::error::{classify, sqlstate, ErrorClass, FOREIGN_KEY_VIOLATION};
use ingestq_db::models::import_definition::CreateImportDefinition;
use ingestq_db::models::import_job::{CreateImportJob, ImportJob};
use ingestq_db::repositories::{
    ImportDefinitionRepo, ImportJobRepo, StagingRowRepo, StatisticsRepo, UnitRepo,
};
use serde_json::json;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn new_job(pool: &PgPool, slug: &str) -> ImportJob {
    let definition = ImportDefinitionRepo::create(
        pool,
        &CreateImportDefinition {
            slug: format!("{slug}_def"),
            name: "Units".to_string(),
            mapping: json!({"ident": "id", "name": "name"}),
            batch_size: Some(2),
        },
    )
    .await
    .unwrap();
    ImportJobRepo::create(
        pool,
        &CreateImportJob {
            definition_id: definition.id,
            slug: slug.to_string(),
            default_valid_from: date(2025, 1, 1),
            default_valid_to: None,
        },
        &CallerIdentity::new("tester"),
    )
    .await
    .unwrap()
}

fn unit(ident: &str, parent: Option<&str>) -> UnitRecord {
    UnitRecord {
        ident: ident.to_string(),
        name: format!("Unit {ident}"),
        parent_ident: parent.map(str::to_string),
        valid_from: date(2025, 1, 1),
        valid_to: None,
        attributes: Default::default(),
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn created_job_has_defaults(pool: PgPool) {
    let job = new_job(&pool, "job_a").await;

    assert_eq!(job.state, ImportJobState::Created);
    assert_eq!(job.created_by, "tester");
    assert_eq!(job.total_rows, 0);
    assert!(job.progress().percent.is_none());
    let found = ImportJobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(found.slug, "job_a");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn duplicate_slug_is_a_unique_violation(pool: PgPool) {
    let job = new_job(&pool, "dup").await;
    let err = ImportJobRepo::create(
        &pool,
        &CreateImportJob {
            definition_id: job.definition_id,
            slug: "dup".to_string(),
            default_valid_from: date(2025, 1, 1),
            default_valid_to: None,
        },
        &CallerIdentity::new("tester"),
    )
    .await
    .unwrap_err();

    assert_eq!(sqlstate(&err).as_deref(), Some("23505"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn transition_requires_expected_state(pool: PgPool) {
    let job = new_job(&pool, "job_t").await;

    let skipped =
        ImportJobRepo::transition(&pool, job.id, ImportJobState::WaitingForUpload, ImportJobState::Processing)
            .await
            .unwrap();
    assert!(skipped.is_none());

    let moved =
        ImportJobRepo::transition(&pool, job.id, ImportJobState::Created, ImportJobState::WaitingForUpload)
            .await
            .unwrap()
            .unwrap();
    assert_eq!(moved.state, ImportJobState::WaitingForUpload);
    assert!(moved.finished_at.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn processed_rows_are_capped_at_total(pool: PgPool) {
    let job = new_job(&pool, "job_p").await;
    ImportJobRepo::transition(&pool, job.id, ImportJobState::Created, ImportJobState::WaitingForUpload)
        .await
        .unwrap();
    ImportJobRepo::start_processing(&pool, job.id, 3).await.unwrap().unwrap();

    let after = ImportJobRepo::add_processed_rows(&pool, job.id, 2).await.unwrap().unwrap();
    assert_eq!(after.processed_rows, 2);
    assert_eq!(after.progress().percent, Some(66.67));

    let after = ImportJobRepo::add_processed_rows(&pool, job.id, 5).await.unwrap().unwrap();
    assert_eq!(after.processed_rows, 3);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn progress_is_ignored_once_rejected(pool: PgPool) {
    let job = new_job(&pool, "job_r").await;
    ImportJobRepo::transition(&pool, job.id, ImportJobState::Created, ImportJobState::WaitingForUpload)
        .await
        .unwrap();
    ImportJobRepo::start_processing(&pool, job.id, 3).await.unwrap();
    let rejected = ImportJobRepo::reject(&pool, job.id, "bad row").await.unwrap().unwrap();
    assert_eq!(rejected.state, ImportJobState::Rejected);
    assert!(rejected.finished_at.is_some());

    assert!(ImportJobRepo::add_processed_rows(&pool, job.id, 1).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Staging rows
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn staging_rows_are_numbered_across_appends(pool: PgPool) {
    let job = new_job(&pool, "job_s").await;

    StagingRowRepo::append(&pool, job.id, &[json!({"id": "a"}), json!({"id": "b"})])
        .await
        .unwrap();
    StagingRowRepo::append(&pool, job.id, &[json!({"id": "c"})]).await.unwrap();

    let rows = StagingRowRepo::fetch_range(&pool, job.id, 1, 10).await.unwrap();
    let numbers: Vec<i32> = rows.iter().map(|r| r.row_no).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(rows[2].data["id"], "c");
    assert_eq!(StagingRowRepo::count(&pool, job.id).await.unwrap(), 3);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn staging_row_errors_are_listed(pool: PgPool) {
    let job = new_job(&pool, "job_e").await;
    StagingRowRepo::append(&pool, job.id, &[json!({}), json!({})]).await.unwrap();

    StagingRowRepo::mark_error(&pool, job.id, 2, "missing ident").await.unwrap();

    let errors = StagingRowRepo::list_errors(&pool, job.id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row_no, 2);
    assert_eq!(errors[0].state, StagingRowState::Error);
    assert_eq!(errors[0].error.as_deref(), Some("missing ident"));
}

// ---------------------------------------------------------------------------
// Units and statistics
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn unit_upsert_is_idempotent(pool: PgPool) {
    let job = new_job(&pool, "job_u").await;

    let first = UnitRepo::upsert(&pool, &unit("100", None), job.id).await.unwrap();
    let again = UnitRepo::upsert(&pool, &unit("100", None), job.id).await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(UnitRepo::count_for_job(&pool, job.id).await.unwrap(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_parent_is_a_business_error(pool: PgPool) {
    let job = new_job(&pool, "job_fk").await;

    let err = UnitRepo::upsert(&pool, &unit("200", Some("missing")), job.id)
        .await
        .unwrap_err();

    assert_eq!(sqlstate(&err).as_deref(), Some(FOREIGN_KEY_VIOLATION));
    assert_matches!(classify(&err), ErrorClass::Business);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn statistics_count_roots_and_children(pool: PgPool) {
    let job = new_job(&pool, "job_st").await;
    UnitRepo::upsert(&pool, &unit("1", None), job.id).await.unwrap();
    UnitRepo::upsert(&pool, &unit("2", Some("1")), job.id).await.unwrap();
    UnitRepo::upsert(&pool, &unit("3", Some("1")), job.id).await.unwrap();

    let stats = StatisticsRepo::refresh(&pool, job.id).await.unwrap();

    assert_eq!(stats.unit_count, 3);
    assert_eq!(stats.root_count, 1);
    assert_eq!(stats.child_count, 2);
    let stored = StatisticsRepo::find(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.unit_count, 3);
}
