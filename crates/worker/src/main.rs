use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingestq_pipeline::Engine;
use ingestq_worker::{shutdown, WorkerConfig, WorkerError, WorkerRuntime};

/// Clean stop, no task failed.
const EXIT_OK: u8 = 0;
/// At least one task reached `failed` during the run.
const EXIT_TASKS_FAILED: u8 = 1;
/// The worker could not start.
const EXIT_STARTUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::parse();
    let engine = match start(&config).await {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Worker failed to start");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(shutdown::cancel_on_signal(cancel.clone()));

    let summary = WorkerRuntime::new(engine.clone(), config.runtime())
        .with_reaper(config.reaper())
        .run(cancel.clone())
        .await;

    cancel.cancel();
    let _ = signals.await;
    engine.pool().close().await;

    if summary.is_clean() {
        ExitCode::from(EXIT_OK)
    } else {
        tracing::warn!(
            failed = summary.failed,
            crashed = summary.crashed,
            "Worker stopped with failures"
        );
        ExitCode::from(EXIT_TASKS_FAILED)
    }
}

async fn start(config: &WorkerConfig) -> Result<Engine, WorkerError> {
    config.validate()?;

    let pool = ingestq_db::create_pool_with(&config.database_url, config.max_connections()).await?;
    tracing::info!(max_connections = config.max_connections(), "Database connection pool created");

    ingestq_db::health_check(&pool).await?;
    ingestq_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Engine::new(pool, config.engine()))
}

/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ingestq_worker=debug,ingestq_pipeline=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
