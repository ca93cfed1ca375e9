use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::secret::Secret;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct CacheConfig {
    pub store: CacheStore,
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(
    rename_all = "kebab-case",
    rename_all_fields = "kebab-case",
    tag = "type"
)]
pub enum CacheStore {
    InMemory {
        #[serde(default = "default_max_size")]
        max_size: u64,
    },
    Redis,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::InMemory {
            max_size: default_max_size(),
        }
    }
}

fn default_max_size() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct RedisConfig {
    pub host_url: Secret<Url>,
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Force the in-process fallback even when a store is configured.
    pub disabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host_url: default_url(),
            connection_timeout: default_connection_timeout(),
            command_timeout: default_command_timeout(),
            disabled: false,
        }
    }
}

fn default_url() -> Secret<Url> {
    Secret::from("redis://localhost:6379".parse::<Url>().unwrap())
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_command_timeout() -> Duration {
    Duration::from_millis(500)
}
