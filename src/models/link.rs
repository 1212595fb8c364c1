use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// How a link's slug came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum LinkType {
    /// Slug generated randomly.
    Auto,
    /// Slug derived from a caller-supplied code.
    Vanity,
}

/// Weak reference to a piece of managed content, used only to re-derive a
/// destination when the explicit URL is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub content_id: i64,
    pub content_kind: String,
}

/// Per-locale overrides merged onto the base link fields. An override
/// applies only when the field is `Some`; there is no cross-locale fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LocalizedContent {
    pub destination_url: Option<String>,
    pub expired_redirect_url: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    /// User-facing display form; immutable once shown to editors.
    pub code: String,
    /// URL-safe derived form of `code`; the actual lookup key.
    pub slug: String,
    pub link_type: LinkType,
    pub destination_url: Option<String>,
    #[sqlx(skip)]
    pub linked_content: Option<ContentRef>,
    pub http_status: u16,
    pub expires_at: Option<i64>,
    pub expired_redirect_url: Option<String>,
    pub track_analytics: bool,
    pub hit_count: i64,
    pub enabled: bool,
    #[sqlx(skip)]
    pub locale_content: HashMap<String, LocalizedContent>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Link {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    fn locale_override(&self, locale: Option<&str>) -> Option<&LocalizedContent> {
        locale.and_then(|l| self.locale_content.get(l))
    }

    pub fn effective_enabled(&self, locale: Option<&str>) -> bool {
        self.locale_override(locale)
            .and_then(|c| c.enabled)
            .unwrap_or(self.enabled)
    }

    pub fn effective_destination(&self, locale: Option<&str>) -> Option<&str> {
        self.locale_override(locale)
            .and_then(|c| c.destination_url.as_deref())
            .filter(|s| !s.is_empty())
            .or(self.destination_url.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn effective_expired_redirect(&self, locale: Option<&str>) -> Option<&str> {
        self.locale_override(locale)
            .and_then(|c| c.expired_redirect_url.as_deref())
            .filter(|s| !s.is_empty())
            .or(self.expired_redirect_url.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Fully-resolved record handed to the storage layer for insertion. Slug
/// derivation and validation happen before this is built.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub code: String,
    pub slug: String,
    pub link_type: LinkType,
    pub destination_url: Option<String>,
    pub linked_content: Option<ContentRef>,
    pub http_status: u16,
    pub expires_at: Option<i64>,
    pub expired_redirect_url: Option<String>,
    pub track_analytics: bool,
    pub enabled: bool,
    pub locale_content: HashMap<String, LocalizedContent>,
}

/// Field-level patch; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkUpdate {
    pub code: Option<String>,
    pub destination_url: Option<Option<String>>,
    pub linked_content: Option<Option<ContentRef>>,
    pub http_status: Option<u16>,
    pub expires_at: Option<Option<i64>>,
    pub expired_redirect_url: Option<Option<String>>,
    pub track_analytics: Option<bool>,
    pub enabled: Option<bool>,
    pub locale_content: Option<HashMap<String, LocalizedContent>>,
}

/// Raw request attributes the server layer extracts for click recording.
#[derive(Debug, Clone, Default)]
pub struct ClickContext {
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// `"qr"`, `"direct"`, or another free-form tag.
    pub source: String,
    pub locale: Option<String>,
    pub accept_language: Option<String>,
    pub lang_param: Option<String>,
}
