use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use http::StatusCode;

use crate::{
    app_state::AppState,
    error::api::ApiError,
    manifest::{
        ManifestRecord, ManifestSummary, RefreshJob,
        refresher::RefreshOptions,
    },
    types::service::ServiceName,
};

pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<ManifestSummary>>, ApiError> {
    Ok(Json(state.0.refresher.summaries().await?))
}

pub async fn detail(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<ManifestRecord>, ApiError> {
    let service = ServiceName::new(&service);
    let record = state
        .0
        .refresher
        .repository()
        .get_manifest(&service)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("manifest `{service}`"))
        })?;
    Ok(Json(record))
}

pub async fn refresh(
    State(state): State<AppState>,
    Path(service): Path<String>,
    body: Result<Json<RefreshOptions>, JsonRejection>,
) -> Result<(StatusCode, Json<RefreshJob>), ApiError> {
    let options = match body {
        Ok(Json(options)) => options,
        // No body at all is fine; defaults apply.
        Err(JsonRejection::MissingJsonContentType(_)) => {
            RefreshOptions::default()
        }
        Err(rejection) => {
            return Err(ApiError::Validation(rejection.body_text()));
        }
    };
    let job = state
        .0
        .refresher
        .trigger_refresh(&ServiceName::new(&service), options)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn history(
    State(state): State<AppState>,
) -> Json<Vec<RefreshJob>> {
    Json(state.0.refresher.list_jobs().await)
}

pub async fn approve(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<RefreshJob>, ApiError> {
    Ok(Json(state.0.refresher.approve(&job_id).await?))
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<RefreshJob>, ApiError> {
    Ok(Json(state.0.refresher.rollback(&job_id).await?))
}
