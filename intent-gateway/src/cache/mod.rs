//! Fingerprinted response cache with a remote and an in-process backend.
//!
//! Cache failures never propagate: a failed read is a miss, a failed write
//! is a no-op. Both backends share the `get` / `put_with_ttl` contract so
//! tests can swap them freely.

pub mod fingerprint;
pub mod memory;
pub mod redis;

use std::time::Duration;

pub use self::fingerprint::fingerprint;
use self::{memory::MemoryCache, redis::RedisCache};
use crate::config::cache::{CacheConfig, CacheStore};

#[derive(Debug, Clone)]
pub enum ResponseCache {
    Redis(RedisCache),
    Memory(MemoryCache),
}

impl ResponseCache {
    /// Build the configured backend, falling back to the in-process store
    /// when redis is disabled or cannot be constructed.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        match &config.store {
            CacheStore::InMemory { max_size } => {
                tracing::debug!("using in-memory response cache");
                Self::Memory(MemoryCache::new(*max_size))
            }
            CacheStore::Redis if config.redis.disabled => {
                tracing::info!(
                    "redis cache disabled, using in-process fallback"
                );
                Self::Memory(MemoryCache::new(default_fallback_capacity()))
            }
            CacheStore::Redis => match RedisCache::new(&config.redis) {
                Ok(redis) => {
                    tracing::debug!("using redis response cache");
                    Self::Redis(redis)
                }
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        "failed to construct redis cache, using in-process fallback"
                    );
                    Self::Memory(MemoryCache::new(default_fallback_capacity()))
                }
            },
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self {
            Self::Memory(memory) => memory.get(key).await,
            Self::Redis(redis) => match redis.get(key) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(error = %error, "cache read failed, treating as miss");
                    None
                }
            },
        }
    }

    pub async fn put_with_ttl(&self, key: &str, payload: String, ttl: Duration) {
        match self {
            Self::Memory(memory) => memory.put_with_ttl(key, payload, ttl).await,
            Self::Redis(redis) => {
                if let Err(error) = redis.put_with_ttl(key, &payload, ttl) {
                    tracing::warn!(error = %error, "cache write failed, skipping");
                }
            }
        }
    }
}

fn default_fallback_capacity() -> u64 {
    10_000
}
