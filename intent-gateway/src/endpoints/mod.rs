//! HTTP surface: request marshaling, error translation, metrics
//! exposition, and the live websocket channel.

pub mod config;
pub mod health;
pub mod intent;
pub mod manifests;
pub mod metrics;
pub mod route;
pub mod ws;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{
    catch_panic::CatchPanicLayer, normalize_path::NormalizePathLayer,
    trace::TraceLayer,
};

use crate::app_state::AppState;

#[must_use]
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::liveness))
        .route("/health/services", get(health::services))
        .route("/metrics", get(metrics::prometheus))
        .route("/metrics/summary", get(metrics::summary))
        .route("/intent/recognize", post(intent::recognize))
        .route("/intent/analyze", post(intent::analyze))
        .route("/intent/test", post(intent::simulate))
        .route("/route", post(route::route))
        .route("/config/rules", get(config::rules))
        .route("/config/rules/{id}", put(config::update_rule))
        .route("/config/reload", post(config::reload))
        .route("/manifests", get(manifests::list))
        .route("/manifests/jobs/history", get(manifests::history))
        .route(
            "/manifests/jobs/{job_id}/approve",
            post(manifests::approve),
        )
        .route(
            "/manifests/jobs/{job_id}/rollback",
            post(manifests::rollback),
        )
        .route("/manifests/{service}", get(manifests::detail))
        .route("/manifests/{service}/refresh", post(manifests::refresh))
        .route("/ws", get(ws::subscribe))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(NormalizePathLayer::trim_trailing_slash())
        .with_state(app_state)
}
