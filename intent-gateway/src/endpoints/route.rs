use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    response::Response,
};

use crate::{
    app_state::AppState, error::api::ApiError, types::request::IntentRequest,
};

/// Classify and forward (or simulate) under the circuit breaker, relaying
/// the downstream status, headers, and body.
pub async fn route(
    State(state): State<AppState>,
    body: Result<Json<IntentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let outcome = state.0.router.route(&request).await?;

    let mut response = Response::builder().status(outcome.status);
    if let Some(headers) = response.headers_mut() {
        *headers = outcome.headers;
    }
    response
        .body(Body::from(outcome.body))
        .map_err(ApiError::internal)
}
