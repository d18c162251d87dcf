/// Failures that stop the worker before it can run.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
