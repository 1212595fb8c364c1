//! Link lifecycle orchestration: slug derivation, auto-generation, and
//! outbound events. Persistence stays behind the `Storage` trait.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RedirectSettings;
use crate::events::{LinkEvent, SinkRegistry};
use crate::models::{ContentRef, Link, LinkType, LinkUpdate, LocalizedContent, NewLink};
use crate::slug::{generation_candidate, max_attempts, slugify, validate_slug};
use crate::storage::{Storage, StorageError, StorageResult};

const ALLOWED_STATUSES: [u16; 4] = [301, 302, 307, 308];

/// Caller-facing creation request; the service derives slug and code.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct CreateLink {
    /// Vanity code. `None` requests an auto-generated one.
    pub code: Option<String>,
    pub destination_url: Option<String>,
    pub linked_content: Option<ContentRef>,
    pub http_status: Option<u16>,
    pub expires_at: Option<i64>,
    pub expired_redirect_url: Option<String>,
    pub track_analytics: Option<bool>,
    pub enabled: Option<bool>,
    pub locale_content: HashMap<String, LocalizedContent>,
}

pub struct LinkService {
    storage: Arc<dyn Storage>,
    settings: RedirectSettings,
    sinks: Arc<SinkRegistry>,
}

impl LinkService {
    pub fn new(
        storage: Arc<dyn Storage>,
        settings: RedirectSettings,
        sinks: Arc<SinkRegistry>,
    ) -> Self {
        Self {
            storage,
            settings,
            sinks,
        }
    }

    pub async fn create(&self, req: CreateLink) -> StorageResult<Link> {
        let destination_url = req.destination_url.filter(|s| !s.is_empty());
        if destination_url.is_none() && req.linked_content.is_none() {
            return Err(StorageError::Validation(
                "a link needs a destination URL or linked content".to_string(),
            ));
        }

        let http_status = req.http_status.unwrap_or(self.settings.default_http_status);
        if !ALLOWED_STATUSES.contains(&http_status) {
            return Err(StorageError::Validation(format!(
                "http_status {http_status} is not a redirect status (301, 302, 307, 308)"
            )));
        }

        let mut new_link = NewLink {
            code: String::new(),
            slug: String::new(),
            link_type: LinkType::Vanity,
            destination_url,
            linked_content: req.linked_content,
            http_status,
            expires_at: req.expires_at,
            expired_redirect_url: req.expired_redirect_url.filter(|s| !s.is_empty()),
            track_analytics: req.track_analytics.unwrap_or(true),
            enabled: req.enabled.unwrap_or(true),
            locale_content: req.locale_content,
        };

        match req.code.filter(|c| !c.is_empty()) {
            Some(code) => {
                let slug = slugify(&code);
                validate_slug(&slug, &self.settings)?;
                new_link.code = code;
                new_link.slug = slug;
                self.storage.insert_link(&new_link).await
            }
            None => {
                new_link.link_type = LinkType::Auto;
                self.create_generated(new_link).await
            }
        }
    }

    /// Bounded generate-and-insert loop. The unique constraint arbitrates
    /// races; a timestamp-suffixed final attempt keeps the loop finite.
    async fn create_generated(&self, mut new_link: NewLink) -> StorageResult<Link> {
        let now = chrono::Utc::now().timestamp();
        for attempt in 0..=max_attempts() {
            let code = generation_candidate(attempt, self.settings.code_length, now);
            let slug = slugify(&code);
            if validate_slug(&slug, &self.settings).is_err() {
                continue;
            }

            new_link.code = code;
            new_link.slug = slug;
            match self.storage.insert_link(&new_link).await {
                Ok(link) => {
                    debug!(slug = %link.slug, attempt, "generated link code");
                    return Ok(link);
                }
                Err(StorageError::Conflict) => {
                    warn!(attempt, "generated code collided, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    pub async fn update(&self, id: i64, patch: LinkUpdate) -> StorageResult<Link> {
        let mut link = self
            .storage
            .get_link(id)
            .await?
            .ok_or(StorageError::NotFound)?;
        let old_slug = link.slug.clone();

        if let Some(code) = patch.code.filter(|c| !c.is_empty()) {
            let slug = slugify(&code);
            validate_slug(&slug, &self.settings)?;
            link.code = code;
            link.slug = slug;
        }
        if let Some(destination_url) = patch.destination_url {
            link.destination_url = destination_url.filter(|s| !s.is_empty());
        }
        if let Some(linked_content) = patch.linked_content {
            link.linked_content = linked_content;
        }
        if let Some(http_status) = patch.http_status {
            if !ALLOWED_STATUSES.contains(&http_status) {
                return Err(StorageError::Validation(format!(
                    "http_status {http_status} is not a redirect status (301, 302, 307, 308)"
                )));
            }
            link.http_status = http_status;
        }
        if let Some(expires_at) = patch.expires_at {
            link.expires_at = expires_at;
        }
        if let Some(expired_redirect_url) = patch.expired_redirect_url {
            link.expired_redirect_url = expired_redirect_url.filter(|s| !s.is_empty());
        }
        if let Some(track_analytics) = patch.track_analytics {
            link.track_analytics = track_analytics;
        }
        if let Some(enabled) = patch.enabled {
            link.enabled = enabled;
        }
        if let Some(locale_content) = patch.locale_content {
            link.locale_content = locale_content;
        }

        if link.destination_url.is_none() && link.linked_content.is_none() {
            return Err(StorageError::Validation(
                "a link needs a destination URL or linked content".to_string(),
            ));
        }

        let updated = self.storage.update_link(&link).await?;

        if updated.slug != old_slug {
            self.sinks.dispatch(&LinkEvent::SlugChanged {
                link_id: updated.id,
                old_slug,
                new_slug: updated.slug.clone(),
                http_status: 301,
            });
        }

        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> StorageResult<()> {
        let link = self
            .storage
            .get_link(id)
            .await?
            .ok_or(StorageError::NotFound)?;

        if !self.storage.delete_link(id).await? {
            return Err(StorageError::NotFound);
        }

        // Only links that actually served traffic are worth announcing.
        if link.hit_count > 0 {
            self.sinks.dispatch(&LinkEvent::LinkDeleted {
                link_id: link.id,
                slug: link.slug,
                hit_count: link.hit_count,
            });
        }

        Ok(())
    }
}
