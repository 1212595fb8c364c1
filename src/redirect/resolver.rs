//! Redirect resolution, separated from HTTP concerns.
//!
//! Resolution checks run in a fixed order (existence, enablement, expiry,
//! destination) and produce an outcome; how each outcome turns into an HTTP
//! response is the handler's policy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ContentRef, Link};
use crate::storage::Storage;

/// Resolves a linked content reference into a destination URL. Implemented
/// by whatever hosts the content; the built-in implementation knows nothing.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve_url(&self, content: &ContentRef, locale: Option<&str>) -> Option<String>;
}

/// Resolver for deployments without a content backend.
pub struct NullContentResolver;

#[async_trait]
impl ContentResolver for NullContentResolver {
    async fn resolve_url(&self, _content: &ContentRef, _locale: Option<&str>) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedirectOutcome {
    NotFound,
    Disabled,
    /// Expired; carries the locale-resolved expired-redirect URL, if any.
    Expired { redirect_url: Option<String> },
    /// Exists and is live but no destination could be derived.
    NoDestination,
    Success { url: String, http_status: u16 },
}

/// Resolved link paired with its outcome, so callers can reach link metadata
/// (id, analytics flag) without a second lookup.
pub struct Resolution {
    pub link: Option<Link>,
    pub outcome: RedirectOutcome,
}

pub async fn resolve(
    storage: &Arc<dyn Storage>,
    content: &Arc<dyn ContentResolver>,
    slug: &str,
    locale: Option<&str>,
    now: i64,
) -> anyhow::Result<Resolution> {
    let Some(link) = storage.get_by_slug(slug).await? else {
        return Ok(Resolution {
            link: None,
            outcome: RedirectOutcome::NotFound,
        });
    };

    if !link.effective_enabled(locale) {
        return Ok(Resolution {
            outcome: RedirectOutcome::Disabled,
            link: Some(link),
        });
    }

    if link.is_expired(now) {
        let redirect_url = link.effective_expired_redirect(locale).map(String::from);
        return Ok(Resolution {
            outcome: RedirectOutcome::Expired { redirect_url },
            link: Some(link),
        });
    }

    let mut destination = link.effective_destination(locale).map(String::from);
    if destination.is_none() {
        if let Some(content_ref) = &link.linked_content {
            destination = content.resolve_url(content_ref, locale).await;
        }
    }

    let outcome = match destination {
        Some(url) => RedirectOutcome::Success {
            url,
            http_status: link.http_status,
        },
        None => RedirectOutcome::NoDestination,
    };

    Ok(Resolution {
        outcome,
        link: Some(link),
    })
}
