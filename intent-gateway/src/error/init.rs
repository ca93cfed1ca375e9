use displaydoc::Display;
use thiserror::Error;

/// Errors that can only occur while the application is starting up.
#[derive(Debug, Error, Display)]
pub enum InitError {
    /// failed to read config: {0}
    Config(#[from] Box<crate::config::Error>),
    /// invalid config: {0}
    InvalidConfig(String),
    /// failed to build http client: {0}
    HttpClient(#[from] reqwest::Error),
    /// failed to open redis client: {0}
    RedisClient(#[from] redis::RedisError),
    /// failed to build redis pool: {0}
    RedisPool(#[from] r2d2::Error),
    /// failed to install metrics recorder: {0}
    MetricsRecorder(
        #[from] metrics_exporter_prometheus::BuildError,
    ),
    /// invalid routing rule `{0}`: {1}
    InvalidRule(String, String),
}
