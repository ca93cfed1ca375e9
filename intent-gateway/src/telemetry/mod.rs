//! Per-service telemetry snapshots with a short TTL. The source is a trait
//! so a real pipeline can replace the synthetic one without touching the
//! refresher.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{types::service::ServiceName, utils::stable_seed};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub service: ServiceName,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub p95_latency_millis: f64,
    pub error_rate: f64,
    pub requests_per_minute: f64,
    pub cost_per_million_requests: f64,
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn snapshot(&self, service: &ServiceName) -> TelemetrySnapshot;
}

/// Deterministic synthetic figures seeded by the service name, cached per
/// service for the configured TTL.
pub struct SyntheticTelemetry {
    ttl: Duration,
    cached: RwLock<FxHashMap<ServiceName, (Instant, TelemetrySnapshot)>>,
}

impl SyntheticTelemetry {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: RwLock::new(FxHashMap::default()),
        }
    }

    fn compute(service: &ServiceName) -> TelemetrySnapshot {
        let seed = stable_seed(service.as_str());
        // Independent streams from one seed; each `mix` pulls a different
        // 16-bit slice through a splitmix round.
        let mix = |salt: u64| -> f64 {
            let mut value =
                seed.wrapping_add(salt.wrapping_mul(0x9e37_79b9_7f4a_7c15));
            value ^= value >> 30;
            value = value.wrapping_mul(0xbf58_476d_1ce4_e5b9);
            value ^= value >> 27;
            #[allow(clippy::cast_precision_loss)]
            let unit = (value % 10_000) as f64 / 10_000.0;
            unit
        };
        let window_end = Utc::now();
        TelemetrySnapshot {
            service: service.clone(),
            window_start: window_end - chrono::Duration::minutes(5),
            window_end,
            cpu_utilization: 0.30 + mix(1) * 0.62,
            memory_utilization: 0.25 + mix(2) * 0.63,
            p95_latency_millis: 80.0 + mix(3) * 820.0,
            error_rate: 0.001 + mix(4) * 0.079,
            requests_per_minute: 40.0 + mix(5) * 2360.0,
            cost_per_million_requests: 8.0 + mix(6) * 18.0,
        }
    }
}

#[async_trait]
impl TelemetrySource for SyntheticTelemetry {
    async fn snapshot(&self, service: &ServiceName) -> TelemetrySnapshot {
        {
            let cached = self.cached.read().await;
            if let Some((at, snapshot)) = cached.get(service)
                && at.elapsed() < self.ttl
            {
                return snapshot.clone();
            }
        }
        let snapshot = Self::compute(service);
        self.cached
            .write()
            .await
            .insert(service.clone(), (Instant::now(), snapshot.clone()));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn figures_stay_in_their_documented_ranges() {
        let telemetry = SyntheticTelemetry::new(Duration::from_secs(300));
        for name in [
            "user-authentication-service",
            "payment-processing-service",
            "image-processing-service",
            "search-service",
        ] {
            let snapshot =
                telemetry.snapshot(&ServiceName::from(name)).await;
            assert!(
                (0.30..=0.92).contains(&snapshot.cpu_utilization),
                "{name} cpu"
            );
            assert!(
                (0.25..=0.88).contains(&snapshot.memory_utilization),
                "{name} memory"
            );
            assert!(
                (80.0..=900.0).contains(&snapshot.p95_latency_millis),
                "{name} p95"
            );
            assert!(
                (0.001..=0.08).contains(&snapshot.error_rate),
                "{name} errors"
            );
            assert!(
                (40.0..=2400.0).contains(&snapshot.requests_per_minute),
                "{name} rpm"
            );
            assert!(
                (8.0..=26.0).contains(&snapshot.cost_per_million_requests),
                "{name} cost"
            );
        }
    }

    #[tokio::test]
    async fn snapshots_are_cached_within_the_ttl() {
        let telemetry = SyntheticTelemetry::new(Duration::from_secs(300));
        let service = ServiceName::from("search-service");
        let first = telemetry.snapshot(&service).await;
        let second = telemetry.snapshot(&service).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn expired_entries_recompute() {
        let telemetry = SyntheticTelemetry::new(Duration::from_millis(0));
        let service = ServiceName::from("search-service");
        let first = telemetry.snapshot(&service).await;
        let second = telemetry.snapshot(&service).await;
        // Deterministic figures, fresh window timestamps.
        assert_eq!(first.cpu_utilization, second.cpu_utilization);
        assert!(second.window_end >= first.window_end);
    }
}
