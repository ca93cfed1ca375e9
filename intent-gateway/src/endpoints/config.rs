use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use http::StatusCode;
use serde_json::json;

use crate::{
    app_state::AppState,
    config::routing::{RoutingConfig, RoutingRule},
    error::api::ApiError,
};

pub async fn rules(
    State(state): State<AppState>,
) -> Json<RoutingConfig> {
    Json(state.0.engine.routing_config().await)
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    body: Result<Json<RoutingRule>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let rule = body
        .map(|Json(rule)| rule)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    if rule.id != rule_id {
        return Err(ApiError::Validation(format!(
            "rule id `{}` does not match path `{rule_id}`",
            rule.id
        )));
    }
    state.0.engine.update_rule(&rule_id, rule).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Re-read the routing bundle from disk (or embedded defaults) and swap it
/// into the engine.
pub async fn reload(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = RoutingConfig::load(
        state.0.config.config_dir.as_deref(),
    )
    .map_err(ApiError::internal)?;
    let categories = config.intent_categories.len();
    let rules = config.routing_rules.len();
    state
        .0
        .engine
        .replace_config(config)
        .await
        .map_err(ApiError::internal)?;
    tracing::info!(categories, rules, "routing configuration reloaded");
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "reloaded {categories} categories and {rules} rules"
        ),
    })))
}
