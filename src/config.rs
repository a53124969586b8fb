//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    pub bind: String,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// Maximum number of tasks handed to a worker per queue fetch.
    pub queue_size: usize,
    /// Concurrent store writes during a result batch submission.
    pub result_fanout: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            db_path: "./data/taskmill.db".to_string(),
            queue_size: 200,
            result_fanout: 5,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from `TASKMILL_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("TASKMILL_BIND") {
            config.bind = bind;
        }
        if let Ok(path) = std::env::var("TASKMILL_DB_PATH") {
            config.db_path = path;
        }
        if let Ok(size) = std::env::var("TASKMILL_QUEUE_SIZE") {
            config.queue_size = size.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TASKMILL_QUEUE_SIZE".to_string(),
                message: format!("expected a positive integer, got {size:?}"),
            })?;
        }
        if let Ok(fanout) = std::env::var("TASKMILL_RESULT_FANOUT") {
            config.result_fanout = fanout.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TASKMILL_RESULT_FANOUT".to_string(),
                message: format!("expected a positive integer, got {fanout:?}"),
            })?;
        }

        Ok(config)
    }
}

/// Client work-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the task server, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// Interval between background save attempts.
    pub save_interval: Duration,
    /// Timeout applied to every network request.
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            save_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.queue_size, 200);
        assert_eq!(config.result_fanout, 5);
    }

    #[test]
    fn session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.save_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(8));
    }
}
