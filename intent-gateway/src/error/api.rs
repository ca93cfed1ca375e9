use axum::{Json, response::IntoResponse};
use displaydoc::Display;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request-scoped errors, mapped onto HTTP status codes at the surface.
///
/// Cache failures are deliberately absent: they are logged and treated as
/// misses, never returned to a client.
#[derive(Debug, Error, Display, strum::AsRefStr)]
pub enum ApiError {
    /// invalid request: {0}
    Validation(String),
    /// not found: {0}
    NotFound(String),
    /// upstream call failed: {0}
    Upstream(String),
    /// upstream call timed out: {0}
    UpstreamTimeout(String),
    /// circuit open, retry after {retry_after_secs}s
    BreakerOpen { retry_after_secs: u64 },
    /// illegal state transition: {0}
    State(String),
    /// internal error
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorDetails {
    pub message: String,
    pub r#type: String,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::BreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::State(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal(Box::new(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match &self {
            // Opaque on purpose, the details are in the logs.
            Self::Internal(error) => {
                tracing::error!(error = %error, "internal server error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(ErrorResponse {
            error: ErrorDetails {
                message,
                r#type: self.as_ref().to_string(),
            },
        });
        match self {
            Self::BreakerOpen { retry_after_secs } => (
                status,
                [(http::header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Validation("empty text".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("job".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::State("already applied".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::BreakerOpen {
                retry_after_secs: 12
            }
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn breaker_open_sets_retry_after() {
        let response = ApiError::BreakerOpen {
            retry_after_secs: 7,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response
                .headers()
                .get(http::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("7")
        );
    }
}
