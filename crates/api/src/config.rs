use std::str::FromStr;
use std::time::Duration;

/// A configuration variable that is set but cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{var} has invalid value '{value}'")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins, from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// Time allowed to produce response headers. Open streams are not cut.
    pub request_timeout_secs: u64,
    /// Idle time before a stream sends a heartbeat.
    pub heartbeat_interval_secs: u64,
    /// Events buffered per stream client before the oldest are dropped.
    pub subscriber_buffer: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `HOST`                    | `0.0.0.0`               |
    /// | `PORT`                    | `3000`                  |
    /// | `CORS_ORIGINS`            | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30`                    |
    /// | `SUBSCRIBER_BUFFER`       | `256`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Self {
            host,
            port: env_or("PORT", 3000)?,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30)?,
            heartbeat_interval_secs: env_or("HEARTBEAT_INTERVAL_SECS", 30)?,
            subscriber_buffer: env_or("SUBSCRIBER_BUFFER", 256)?,
        };
        if config.heartbeat_interval_secs == 0 {
            return Err(ConfigError {
                var: "HEARTBEAT_INTERVAL_SECS",
                value: "0".into(),
            });
        }
        if config.subscriber_buffer == 0 {
            return Err(ConfigError {
                var: "SUBSCRIBER_BUFFER",
                value: "0".into(),
            });
        }
        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn env_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError { var, value }),
        Err(_) => Ok(default),
    }
}
