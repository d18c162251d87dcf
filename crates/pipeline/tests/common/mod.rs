//! Shared setup for pipeline integration tests.

#![allow(dead_code)]

use std::time::Duration;

use chrono::NaiveDate;
use ingestq_core::types::CallerIdentity;
use ingestq_db::models::import_definition::CreateImportDefinition;
use ingestq_db::models::import_job::{CreateImportJob, ImportJob};
use ingestq_pipeline::{Engine, EngineConfig, ImportJobController, Outcome};
use serde_json::{json, Value};
use sqlx::PgPool;

pub fn engine(pool: &PgPool) -> Engine {
    Engine::new(
        pool.clone(),
        EngineConfig {
            lock_timeout: Duration::from_millis(200),
        },
    )
}

pub fn caller() -> CallerIdentity {
    CallerIdentity::new("importer@example.test")
}

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

pub fn standard_mapping() -> Value {
    json!({
        "ident": "orgnr",
        "name": "navn",
        "parent_ident": "parent",
        "attr.sector": "sector",
    })
}

/// Create a definition and a job waiting for upload.
pub async fn new_job(controller: &ImportJobController, slug: &str, batch_size: i32) -> ImportJob {
    let definition = controller
        .create_definition(&CreateImportDefinition {
            slug: format!("{slug}_def"),
            name: format!("Definition for {slug}"),
            mapping: standard_mapping(),
            batch_size: Some(batch_size),
        })
        .await
        .unwrap();
    controller
        .create_job(
            &CreateImportJob {
                definition_id: definition.id,
                slug: slug.to_string(),
                default_valid_from: start_date(),
                default_valid_to: None,
            },
            &caller(),
        )
        .await
        .unwrap()
}

pub fn row(orgnr: &str, parent: Option<&str>) -> Value {
    json!({
        "orgnr": orgnr,
        "navn": format!("Unit {orgnr}"),
        "parent": parent,
        "sector": "2100",
    })
}

/// Claim and execute one task at a time until nothing is claimable.
pub async fn drain(engine: &Engine) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    loop {
        let claimed = engine.claim_batch(1, "test-worker").await.unwrap();
        if claimed.is_empty() {
            return outcomes;
        }
        for task in &claimed {
            outcomes.push(engine.execute(task).await.unwrap());
        }
    }
}
