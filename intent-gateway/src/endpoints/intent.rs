use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;

use crate::{
    app_state::AppState,
    error::api::ApiError,
    types::{request::IntentRequest, response::IntentResponse},
};

/// Default estimate when no health data and no routed traffic exist yet.
const DEFAULT_ESTIMATED_LATENCY_MILLIS: f64 = 50.0;

fn parse<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

pub async fn recognize(
    State(state): State<AppState>,
    body: Result<Json<IntentRequest>, JsonRejection>,
) -> Result<Json<IntentResponse>, ApiError> {
    let request = parse(body)?;
    let response = state.0.engine.classify_intent(&request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    text: Option<String>,
}

/// Text-only shortcut for `recognize`.
pub async fn analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Json<IntentResponse>, ApiError> {
    let body = parse(body)?;
    let text = body
        .text
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| {
            ApiError::Validation("`text` must be non-empty".to_string())
        })?;
    let response = state
        .0
        .engine
        .classify_intent(&IntentRequest::from_text(text))
        .await?;
    Ok(Json(response))
}

/// Classify without routing; reports what the router would do.
pub async fn simulate(
    State(state): State<AppState>,
    body: Result<Json<IntentRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = parse(body)?;
    let response = state.0.engine.classify_intent(&request).await?;

    let target = &response.routing.target_service;
    let would_route = state.0.registry.get_descriptor(target).is_some();
    let estimated_latency = estimated_latency(&state, &response).await;

    let mut merged = serde_json::to_value(&response)
        .map_err(ApiError::internal)?;
    let extras = serde_json::json!({
        "wouldRoute": would_route,
        "targetService": target,
        "estimatedLatency": estimated_latency,
        "confidence": response.recognized_intent.confidence,
    });
    if let (Some(object), Some(extra)) =
        (merged.as_object_mut(), extras.as_object())
    {
        for (key, value) in extra {
            object.insert(key.clone(), value.clone());
        }
    }
    Ok(Json(merged))
}

async fn estimated_latency(
    state: &AppState,
    response: &IntentResponse,
) -> f64 {
    let health = state.0.registry.all_health().await;
    health
        .iter()
        .find(|record| record.service == response.routing.target_service)
        .map(|record| {
            #[allow(clippy::cast_precision_loss)]
            let latency = record.latency_millis as f64;
            latency
        })
        .or_else(|| state.0.router.metrics.average_latency_millis())
        .unwrap_or(DEFAULT_ESTIMATED_LATENCY_MILLIS)
}
