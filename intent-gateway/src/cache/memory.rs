use std::time::{Duration, Instant};

use moka::future::Cache;

/// In-process fallback store with per-entry expiry.
///
/// Capacity-bounded by moka; expiry is enforced on read so the semantics
/// match the remote store exactly.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    payload: String,
    expires_at: Instant,
}

impl MemoryCache {
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_size).build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key).await?;
        if entry.expires_at <= Instant::now() {
            self.entries.invalidate(key).await;
            return None;
        }
        Some(entry.payload)
    }

    pub async fn put_with_ttl(&self, key: &str, payload: String, ttl: Duration) {
        self.entries
            .insert(
                key.to_string(),
                Entry {
                    payload,
                    expires_at: Instant::now() + ttl,
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_your_writes_within_ttl() {
        let cache = MemoryCache::new(16);
        cache
            .put_with_ttl("k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn expired_entries_read_as_misses() {
        let cache = MemoryCache::new(16);
        cache
            .put_with_ttl("k", "v".to_string(), Duration::from_millis(0))
            .await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn unknown_keys_miss() {
        let cache = MemoryCache::new(16);
        assert_eq!(cache.get("absent").await, None);
    }
}
