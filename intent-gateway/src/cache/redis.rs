use std::time::Duration;

use r2d2::Pool;
use redis::{Client, Commands};

use crate::{config::cache::RedisConfig, error::init::InitError};

/// Remote store backed by a blocking redis pool.
///
/// Checkout and commands are deadline-bounded; when the server is away the
/// pool errors out immediately instead of queuing, and every command gets at
/// most one retry on a fresh connection.
#[derive(Debug, Clone)]
pub struct RedisCache {
    pool: Pool<Client>,
    command_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("redis pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("redis command: {0}")]
    Command(#[from] redis::RedisError),
}

impl RedisCache {
    pub fn new(config: &RedisConfig) -> Result<Self, InitError> {
        let client = Client::open(config.host_url.expose().clone())?;
        let pool = Pool::builder()
            .connection_timeout(config.connection_timeout)
            .build(client)?;
        Ok(Self {
            pool,
            command_timeout: config.command_timeout,
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, CommandError> {
        self.with_retry(|cache| {
            let mut conn = cache.checkout()?;
            Ok(conn.get(key)?)
        })
    }

    pub fn put_with_ttl(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), CommandError> {
        let ttl_secs = ttl.as_secs().max(1);
        self.with_retry(|cache| {
            let mut conn = cache.checkout()?;
            let _: () = conn.set_ex(key, payload, ttl_secs)?;
            Ok(())
        })
    }

    fn checkout(
        &self,
    ) -> Result<r2d2::PooledConnection<Client>, CommandError> {
        let conn = self.pool.get()?;
        conn.set_read_timeout(Some(self.command_timeout))?;
        conn.set_write_timeout(Some(self.command_timeout))?;
        Ok(conn)
    }

    fn with_retry<T>(
        &self,
        operation: impl Fn(&Self) -> Result<T, CommandError>,
    ) -> Result<T, CommandError> {
        match operation(self) {
            Ok(value) => Ok(value),
            Err(first) => {
                tracing::debug!(error = %first, "redis command failed, retrying once");
                operation(self)
            }
        }
    }
}
