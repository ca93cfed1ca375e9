//! Rolling in-process metrics for the routing summary endpoint.

use std::{collections::BTreeMap, sync::Mutex};

use serde::Serialize;

use crate::types::service::ServiceName;

const EMA_ALPHA: f64 = 0.1;
pub const HIGH_CONFIDENCE: f64 = 0.85;
pub const MEDIUM_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Default)]
pub struct RoutingMetrics {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    total_requests: u64,
    per_service: BTreeMap<String, u64>,
    ema_latency_millis: Option<f64>,
    high_confidence: u64,
    medium_confidence: u64,
    low_confidence: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMetricsSummary {
    pub total_requests: u64,
    pub service_distribution: BTreeMap<String, u64>,
    pub average_latency_millis: f64,
    pub cache_hit_rate: f64,
    pub confidence: ConfidenceHistogram,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfidenceHistogram {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl RoutingMetrics {
    pub fn record(
        &self,
        service: &ServiceName,
        confidence: f64,
        latency_millis: f64,
    ) {
        let mut inner =
            self.inner.lock().expect("metrics lock never poisoned");
        inner.total_requests += 1;
        *inner
            .per_service
            .entry(service.to_string())
            .or_default() += 1;
        inner.ema_latency_millis = Some(match inner.ema_latency_millis {
            Some(ema) => EMA_ALPHA * latency_millis + (1.0 - EMA_ALPHA) * ema,
            None => latency_millis,
        });
        if confidence >= HIGH_CONFIDENCE {
            inner.high_confidence += 1;
        } else if confidence >= MEDIUM_CONFIDENCE {
            inner.medium_confidence += 1;
        } else {
            inner.low_confidence += 1;
        }
    }

    /// Point-in-time rollup. `cache_hits` / `cache_misses` come from the
    /// engine, which owns those counters.
    #[must_use]
    pub fn summary(
        &self,
        cache_hits: u64,
        cache_misses: u64,
    ) -> RoutingMetricsSummary {
        let inner =
            self.inner.lock().expect("metrics lock never poisoned");
        let lookups = cache_hits + cache_misses;
        #[allow(clippy::cast_precision_loss)]
        let cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            cache_hits as f64 / lookups as f64
        };
        RoutingMetricsSummary {
            total_requests: inner.total_requests,
            service_distribution: inner.per_service.clone(),
            average_latency_millis: inner
                .ema_latency_millis
                .unwrap_or(0.0),
            cache_hit_rate,
            confidence: ConfidenceHistogram {
                high: inner.high_confidence,
                medium: inner.medium_confidence,
                low: inner.low_confidence,
            },
        }
    }

    /// Current EMA latency, used for the simulation endpoint's estimate.
    #[must_use]
    pub fn average_latency_millis(&self) -> Option<f64> {
        self.inner
            .lock()
            .expect("metrics lock never poisoned")
            .ema_latency_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_converges_toward_recent_samples() {
        let metrics = RoutingMetrics::default();
        let service = ServiceName::from("search-service");
        metrics.record(&service, 0.9, 100.0);
        assert!(
            (metrics.average_latency_millis().unwrap() - 100.0).abs() < 1e-9
        );
        metrics.record(&service, 0.9, 200.0);
        // 0.1 * 200 + 0.9 * 100
        assert!(
            (metrics.average_latency_millis().unwrap() - 110.0).abs() < 1e-9
        );
    }

    #[test]
    fn confidence_buckets_split_at_the_thresholds() {
        let metrics = RoutingMetrics::default();
        let service = ServiceName::from("search-service");
        metrics.record(&service, 0.85, 1.0);
        metrics.record(&service, 0.6, 1.0);
        metrics.record(&service, 0.59, 1.0);
        let summary = metrics.summary(0, 0);
        assert_eq!(summary.confidence.high, 1);
        assert_eq!(summary.confidence.medium, 1);
        assert_eq!(summary.confidence.low, 1);
    }

    #[test]
    fn summary_includes_distribution_and_hit_rate() {
        let metrics = RoutingMetrics::default();
        metrics.record(&ServiceName::from("a"), 0.9, 5.0);
        metrics.record(&ServiceName::from("a"), 0.9, 5.0);
        metrics.record(&ServiceName::from("b"), 0.9, 5.0);
        let summary = metrics.summary(3, 1);
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.service_distribution["a"], 2);
        assert_eq!(summary.service_distribution["b"], 1);
        assert!((summary.cache_hit_rate - 0.75).abs() < 1e-9);
    }
}
