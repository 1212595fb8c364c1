use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::{Aggregator, AnalyticsSummary, DateRange};
use crate::config::AnalyticsSettings;
use crate::links::{CreateLink, LinkService};
use crate::models::{Link, LinkUpdate};
use crate::storage::{Storage, StorageError};

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub links: Arc<LinkService>,
    pub aggregator: Arc<Aggregator>,
    pub analytics: AnalyticsSettings,
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn storage_error(e: StorageError) -> ApiError {
    match e {
        StorageError::NotFound => api_error(StatusCode::NOT_FOUND, "Link not found"),
        StorageError::Conflict => api_error(StatusCode::CONFLICT, "Slug already exists"),
        StorageError::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        StorageError::Configuration(msg) => {
            tracing::error!(error = %msg, "configuration error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
        StorageError::Other(e) => {
            tracing::error!(error = %e, "storage error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn internal_error(e: anyhow::Error) -> ApiError {
    tracing::error!(error = %e, "request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Create a link; omitting `code` auto-generates one.
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateLink>,
) -> Result<(StatusCode, Json<Link>), ApiError> {
    let link = state.links.create(payload).await.map_err(storage_error)?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn list_links(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Link>>, ApiError> {
    let links = state
        .storage
        .list_links(query.limit.clamp(1, 500), query.offset.max(0))
        .await
        .map_err(internal_error)?;
    Ok(Json(links))
}

pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Link>, ApiError> {
    match state.storage.get_by_slug(&slug).await {
        Ok(Some(link)) => Ok(Json(link)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "Link not found")),
        Err(e) => Err(internal_error(e)),
    }
}

pub async fn update_link(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(patch): Json<LinkUpdate>,
) -> Result<Json<Link>, ApiError> {
    let existing = state
        .storage
        .get_by_slug(&slug)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Link not found"))?;

    let updated = state
        .links
        .update(existing.id, patch)
        .await
        .map_err(storage_error)?;
    Ok(Json(updated))
}

pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let existing = state
        .storage
        .get_by_slug(&slug)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Link not found"))?;

    state
        .links
        .delete(existing.id)
        .await
        .map_err(storage_error)?;
    Ok(Json(SuccessResponse {
        message: "Link deleted".to_string(),
    }))
}

#[derive(Deserialize)]
pub struct AnalyticsQuery {
    pub range: Option<String>,
    pub link_id: Option<i64>,
    pub format: Option<String>,
}

fn parse_range(range: Option<&str>) -> Result<DateRange, ApiError> {
    match range {
        Some(s) => s
            .parse()
            .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e)),
        None => Ok(DateRange::default()),
    }
}

pub async fn analytics_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    let range = parse_range(query.range.as_deref())?;
    let summary = state
        .aggregator
        .summary(range, query.link_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(summary))
}

/// Click export as CSV (default) or JSON.
pub async fn analytics_export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Response, ApiError> {
    let range = parse_range(query.range.as_deref())?;
    let rows = state
        .aggregator
        .export(range, query.link_id)
        .await
        .map_err(internal_error)?;

    if query.format.as_deref() == Some("json") {
        return Ok(Json(rows).into_response());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in &rows {
        writer
            .serialize(row)
            .map_err(|e| internal_error(e.into()))?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| internal_error(anyhow::anyhow!("csv write failed: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"clicks.csv\"",
            ),
        ],
        data,
    )
        .into_response())
}

#[derive(Serialize)]
pub struct CleanupResponse {
    pub deleted: u64,
    pub retention_days: u32,
}

/// Trigger the retention sweep immediately.
pub async fn cleanup_analytics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let deleted = state
        .aggregator
        .cleanup(state.analytics.retention_days)
        .await
        .map_err(internal_error)?;
    Ok(Json(CleanupResponse {
        deleted,
        retention_days: state.analytics.retention_days,
    }))
}
