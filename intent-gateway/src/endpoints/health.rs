use axum::{Json, extract::State};
use serde_json::json;

use crate::{app_state::AppState, types::service::HealthRecord};

pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
    }))
}

pub async fn services(
    State(state): State<AppState>,
) -> Json<Vec<HealthRecord>> {
    Json(state.0.registry.all_health().await)
}
