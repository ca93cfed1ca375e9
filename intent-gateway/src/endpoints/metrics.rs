use axum::{Json, extract::State, response::IntoResponse};

use crate::{app_state::AppState, metrics, router::metrics::RoutingMetricsSummary};

/// Prometheus exposition; names are fixed in [`crate::metrics`].
pub async fn prometheus() -> impl IntoResponse {
    let body = metrics::prometheus_handle()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .unwrap_or_default();
    (
        [(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

pub async fn summary(
    State(state): State<AppState>,
) -> Json<RoutingMetricsSummary> {
    let (hits, misses) = state.0.engine.cache_stats();
    Json(state.0.router.metrics.summary(hits, misses))
}
