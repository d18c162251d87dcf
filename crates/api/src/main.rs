use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ingestq_events::{ChangeListener, ChangePublisher, PublisherConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingestq_api::config::ServerConfig;
use ingestq_api::router::build_app_router;
use ingestq_api::state::AppState;

type StartupError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;
    let pool = ingestq_db::create_pool(&database_url).await?;
    ingestq_db::health_check(&pool).await?;
    ingestq_db::run_migrations(&pool).await?;
    tracing::info!("Database ready, migrations applied");

    // --- Change notifications ---
    let publisher = ChangePublisher::new(PublisherConfig {
        buffer: config.subscriber_buffer,
        heartbeat_interval: config.heartbeat_interval(),
    });
    let listener_cancel = CancellationToken::new();
    let listener_handle = tokio::spawn(
        ChangeListener::new(pool.clone(), publisher.clone()).run(listener_cancel.clone()),
    );

    // --- Router ---
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config),
        publisher: publisher.clone(),
    };
    let app = build_app_router(state)?;

    // --- Start server ---
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Open streams never end on their own; close them once shutdown begins
    // so graceful shutdown can drain.
    let shutdown_publisher = publisher.clone();
    let shutdown_cancel = listener_cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_cancel.cancel();
            shutdown_publisher.close_all();
        })
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    listener_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), listener_handle).await;
    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ingestq_api=debug,ingestq_events=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
