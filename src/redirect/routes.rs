use axum::{routing::get, Router};
use std::sync::Arc;

use super::handlers::{health_check, redirect_slug, RedirectState};

/// Short links resolve at the root and, when a prefix is configured, under
/// `/{prefix}/{slug}` as well.
pub fn create_redirect_router(state: Arc<RedirectState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/{slug}", get(redirect_slug));
    let prefix = state.settings.slug_prefix.trim_matches('/');
    if !prefix.is_empty() {
        router = router.route(&format!("/{prefix}/{{slug}}"), get(redirect_slug));
    }
    router.with_state(state)
}
