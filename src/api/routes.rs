use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::handlers::{
    analytics_export, analytics_summary, cleanup_analytics, create_link, delete_link, get_link,
    list_links, update_link, AppState, ErrorResponse,
};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/links", post(create_link).get(list_links))
        .route(
            "/links/{slug}",
            get(get_link).put(update_link).delete(delete_link),
        )
        .route("/analytics/summary", get(analytics_summary))
        .route("/analytics/export", get(analytics_export))
        .route("/analytics/cleanup", post(cleanup_analytics))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_bearer,
        ))
        .with_state(state)
}

/// Bearer-token gate for the admin API. With no token configured every
/// request is refused rather than silently allowed through.
async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "API token is not configured".to_string(),
            }),
        )
            .into_response();
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid or missing API token".to_string(),
            }),
        )
            .into_response(),
    }
}
