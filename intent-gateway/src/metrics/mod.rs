//! Prometheus metrics. Names are fixed for scraper compatibility, so they
//! live here as constants and every recording site goes through this
//! module.

use std::sync::{Mutex, OnceLock};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::init::InitError;

pub const METRIC_REQUESTS_TOTAL: &str = "router_requests_total";
pub const METRIC_LATENCY_SECONDS: &str = "router_latency_seconds";
pub const METRIC_CACHE_HITS_TOTAL: &str = "router_cache_hits_total";
pub const METRIC_CACHE_MISSES_TOTAL: &str = "router_cache_misses_total";
pub const METRIC_ACTIVE_CONNECTIONS: &str = "router_active_connections";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL: Mutex<()> = Mutex::new(());

/// Install the global Prometheus recorder. Safe to call more than once;
/// later calls are no-ops.
pub fn install_default_exporter() -> Result<(), InitError> {
    let _guard = INSTALL.lock().expect("install lock never poisoned");
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}

#[must_use]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

fn describe() {
    metrics::describe_counter!(
        METRIC_REQUESTS_TOTAL,
        "Routed requests by service, intent, and status"
    );
    metrics::describe_histogram!(
        METRIC_LATENCY_SECONDS,
        metrics::Unit::Seconds,
        "Routing latency by service and intent"
    );
    metrics::describe_counter!(
        METRIC_CACHE_HITS_TOTAL,
        "Intent cache hits"
    );
    metrics::describe_counter!(
        METRIC_CACHE_MISSES_TOTAL,
        "Intent cache misses"
    );
    metrics::describe_gauge!(
        METRIC_ACTIVE_CONNECTIONS,
        "Connections currently being served"
    );
}

pub fn record_request(service: &str, intent: &str, status: u16) {
    metrics::counter!(
        METRIC_REQUESTS_TOTAL,
        "service" => service.to_string(),
        "intent" => intent.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

pub fn record_latency(service: &str, intent: &str, seconds: f64) {
    metrics::histogram!(
        METRIC_LATENCY_SECONDS,
        "service" => service.to_string(),
        "intent" => intent.to_string(),
    )
    .record(seconds);
}

pub fn record_cache_hit() {
    metrics::counter!(METRIC_CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    metrics::counter!(METRIC_CACHE_MISSES_TOTAL).increment(1);
}

pub fn connection_opened() {
    metrics::gauge!(METRIC_ACTIVE_CONNECTIONS).increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!(METRIC_ACTIVE_CONNECTIONS).decrement(1.0);
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;

    #[test]
    fn request_counter_records_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            record_request("payment-processing-service", "payment", 200);
            record_request("payment-processing-service", "payment", 200);
        });
        let snapshot = snapshotter.snapshot().into_vec();
        let (key, _, _, value) = snapshot
            .iter()
            .find(|(key, ..)| {
                key.key().name() == METRIC_REQUESTS_TOTAL
            })
            .expect("counter recorded");
        assert!(matches!(value, DebugValue::Counter(2)));
        assert!(
            key.key()
                .labels()
                .any(|label| label.key() == "service"
                    && label.value() == "payment-processing-service")
        );
    }

    #[test]
    fn latency_histogram_records_seconds() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            record_latency("search-service", "search", 0.042);
        });
        let snapshot = snapshotter.snapshot().into_vec();
        let recorded = snapshot
            .iter()
            .any(|(key, ..)| key.key().name() == METRIC_LATENCY_SECONDS);
        assert!(recorded);
    }
}
