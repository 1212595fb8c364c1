use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Link, NewLink};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found")]
    NotFound,
    #[error("slug already exists")]
    Conflict,
    #[error("{0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Inclusive start / exclusive end unix-second bounds; `None` is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeWindow {
    pub const ALL: TimeWindow = TimeWindow {
        start: None,
        end: None,
    };

    pub fn since(start: i64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn between(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

/// Click-event columns a breakdown can group by. An enum rather than a raw
/// column string keeps caller input out of the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickDimension {
    DeviceType,
    Browser,
    Os,
    Country,
    City,
    Referrer,
}

impl ClickDimension {
    pub fn column(self) -> &'static str {
        match self {
            ClickDimension::DeviceType => "device_type",
            ClickDimension::Browser => "browser",
            ClickDimension::Os => "os_name",
            ClickDimension::Country => "country",
            ClickDimension::City => "city",
            ClickDimension::Referrer => "referrer",
        }
    }
}

/// A click event ready for insertion; the id is storage-assigned.
#[derive(Debug, Clone, Default)]
pub struct NewClickEvent {
    pub link_id: i64,
    pub timestamp: i64,
    pub ip_hash: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub browser_engine: Option<String>,
    pub client_type: Option<String>,
    pub is_mobile_app: bool,
    pub is_bot: bool,
    pub bot_name: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub referrer: Option<String>,
    pub source: String,
    pub language: Option<String>,
}

/// Per-link click totals over a window, joined with link identity.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TopLink {
    pub id: i64,
    pub code: String,
    pub slug: String,
    pub destination_url: Option<String>,
    pub clicks: i64,
    pub last_click: Option<i64>,
}

/// One click event flattened with its link's identity, for recent-click
/// listings and export rows.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClickRow {
    pub timestamp: i64,
    pub link_id: i64,
    pub code: String,
    pub slug: String,
    pub destination_url: Option<String>,
    pub device_type: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub language: Option<String>,
    pub source: String,
    pub referrer: Option<String>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, enable foreign keys).
    async fn init(&self) -> Result<()>;

    /// Insert a fully-resolved link. A slug collision maps to
    /// `StorageError::Conflict`, relying on the unique constraint so that
    /// concurrent duplicate creates race safely.
    async fn insert_link(&self, link: &NewLink) -> StorageResult<Link>;

    async fn get_link(&self, id: i64) -> Result<Option<Link>>;

    /// Case-sensitive exact slug match. Disabled and expired links are
    /// returned; redirect policy is the caller's business.
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Link>>;

    /// Persist every editable field of `link` (never `hit_count`, which only
    /// moves through `increment_hits`). Locale overrides are replaced
    /// wholesale.
    async fn update_link(&self, link: &Link) -> StorageResult<Link>;

    /// Delete a link; click events cascade.
    async fn delete_link(&self, id: i64) -> Result<bool>;

    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<Link>>;

    /// Storage-level `hit_count = hit_count + ?`; never read-modify-write.
    async fn increment_hits(&self, id: i64, amount: u64) -> Result<()>;

    async fn insert_click(&self, event: &NewClickEvent) -> Result<i64>;

    async fn count_clicks(&self, window: &TimeWindow, link_id: Option<i64>) -> Result<i64>;

    /// `COUNT(DISTINCT ip_hash)` over non-null hashes.
    async fn count_unique_visitors(&self, window: &TimeWindow, link_id: Option<i64>)
        -> Result<i64>;

    /// Grouped counts for one dimension, descending, rows with a NULL
    /// dimension excluded (not coerced to an "unknown" bucket).
    async fn dimension_breakdown(
        &self,
        dimension: ClickDimension,
        window: &TimeWindow,
        link_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<(String, i64)>>;

    /// Counts per `YYYY-MM-DD` day bucket, ascending.
    async fn clicks_by_day(&self, window: &TimeWindow, link_id: Option<i64>)
        -> Result<Vec<(String, i64)>>;

    /// Counts per hour-of-day (0..=23); missing hours are absent.
    async fn clicks_by_hour(&self, window: &TimeWindow, link_id: Option<i64>)
        -> Result<Vec<(i64, i64)>>;

    async fn count_links(&self) -> Result<i64>;

    async fn count_active_links(&self) -> Result<i64>;

    /// Distinct links with at least one click in the window.
    async fn count_links_with_clicks(&self, window: &TimeWindow) -> Result<i64>;

    async fn top_links(&self, window: &TimeWindow, limit: i64) -> Result<Vec<TopLink>>;

    async fn recent_clicks(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ClickRow>>;

    /// Every click in the window, newest first, for export adapters.
    async fn export_clicks(&self, window: &TimeWindow, link_id: Option<i64>)
        -> Result<Vec<ClickRow>>;

    /// Retention sweep; returns the number of deleted events.
    async fn delete_clicks_before(&self, cutoff: i64) -> Result<u64>;
}
