use sqlx::PgPool;

/// Connect, migrate, verify schema.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_bootstrap(pool: PgPool) {
    ingestq_db::health_check(&pool).await.unwrap();

    let tables = [
        "tasks",
        "import_definitions",
        "import_jobs",
        "staging_rows",
        "units",
        "import_job_statistics",
    ];

    for table in tables {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("{table} query failed: {e}"));
        assert_eq!(count.0, 0, "{table} should start empty");
    }
}

/// Both change triggers are installed.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_change_triggers_installed(pool: PgPool) {
    let triggers: Vec<String> = sqlx::query_scalar(
        "SELECT tgname::TEXT FROM pg_trigger WHERE tgname IN ('tasks_notify', 'import_jobs_notify') \
         ORDER BY tgname",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(triggers, vec!["import_jobs_notify", "tasks_notify"]);
}
