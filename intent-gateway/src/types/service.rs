use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_TIMEOUT_MILLIS: u64 = 30_000;

/// Name of a downstream service, e.g. `user-authentication-service`.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct ServiceName(CompactString);

impl ServiceName {
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(CompactString::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ServiceName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Static description of a downstream service, loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    pub url: Url,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_timeout_millis() -> u64 {
    DEFAULT_TIMEOUT_MILLIS
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

/// Rolling health for one service, owned by the registry.
///
/// `last_checked` only moves forward; the registry enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub service: ServiceName,
    pub status: HealthStatus,
    pub latency_millis: u64,
    pub error_rate: f64,
    pub throughput_per_minute: u64,
    pub last_checked: DateTime<Utc>,
}
