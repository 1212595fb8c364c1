use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};

use crate::models::{ContentRef, Link, LocalizedContent, NewLink};
use crate::storage::{
    ClickDimension, ClickRow, NewClickEvent, Storage, StorageError, StorageResult, TimeWindow,
    TopLink,
};

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn link_from_row(row: &SqliteRow) -> Result<Link> {
        let mut link = Link::from_row(row)?;
        let content_id: Option<i64> = row.try_get("content_id")?;
        let content_kind: Option<String> = row.try_get("content_kind")?;
        if let (Some(content_id), Some(content_kind)) = (content_id, content_kind) {
            link.linked_content = Some(ContentRef {
                content_id,
                content_kind,
            });
        }
        Ok(link)
    }

    async fn load_locale_content(
        &self,
        link_id: i64,
    ) -> Result<HashMap<String, LocalizedContent>> {
        let rows = sqlx::query_as::<_, (String, Option<String>, Option<String>, Option<bool>)>(
            r#"
            SELECT locale, destination_url, expired_redirect_url, enabled
            FROM link_content
            WHERE link_id = ?
            "#,
        )
        .bind(link_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(locale, destination_url, expired_redirect_url, enabled)| {
                (
                    locale,
                    LocalizedContent {
                        destination_url,
                        expired_redirect_url,
                        enabled,
                    },
                )
            })
            .collect())
    }

    async fn replace_locale_content(
        &self,
        link_id: i64,
        content: &HashMap<String, LocalizedContent>,
    ) -> Result<()> {
        sqlx::query("DELETE FROM link_content WHERE link_id = ?")
            .bind(link_id)
            .execute(self.pool.as_ref())
            .await?;

        for (locale, localized) in content {
            sqlx::query(
                r#"
                INSERT INTO link_content (link_id, locale, destination_url, expired_redirect_url, enabled)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(link_id)
            .bind(locale)
            .bind(&localized.destination_url)
            .bind(&localized.expired_redirect_url)
            .bind(localized.enabled)
            .execute(self.pool.as_ref())
            .await?;
        }

        Ok(())
    }

    async fn fetch_link(&self, where_clause: &str, bind: LinkKey<'_>) -> Result<Option<Link>> {
        let sql = format!("SELECT * FROM links WHERE {where_clause}");
        let query = sqlx::query(&sql);
        let query = match bind {
            LinkKey::Id(id) => query.bind(id),
            LinkKey::Slug(slug) => query.bind(slug),
        };
        let row = query.fetch_optional(self.pool.as_ref()).await?;

        match row {
            Some(row) => {
                let mut link = Self::link_from_row(&row)?;
                link.locale_content = self.load_locale_content(link.id).await?;
                Ok(Some(link))
            }
            None => Ok(None),
        }
    }
}

enum LinkKey<'a> {
    Id(i64),
    Slug(&'a str),
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Append window/link filters to `sql` and remember which binds apply.
fn push_click_filters(sql: &mut String, window: &TimeWindow, link_id: Option<i64>, alias: &str) {
    if window.start.is_some() {
        sql.push_str(&format!(" AND {alias}timestamp >= ?"));
    }
    if window.end.is_some() {
        sql.push_str(&format!(" AND {alias}timestamp < ?"));
    }
    if link_id.is_some() {
        sql.push_str(&format!(" AND {alias}link_id = ?"));
    }
}

macro_rules! bind_click_filters {
    ($query:expr, $window:expr, $link_id:expr) => {{
        let mut q = $query;
        if let Some(start) = $window.start {
            q = q.bind(start);
        }
        if let Some(end) = $window.end {
            q = q.bind(end);
        }
        if let Some(id) = $link_id {
            q = q.bind(id);
        }
        q
    }};
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                link_type TEXT NOT NULL DEFAULT 'vanity',
                destination_url TEXT,
                content_id INTEGER,
                content_kind TEXT,
                http_status INTEGER NOT NULL DEFAULT 301,
                expires_at INTEGER,
                expired_redirect_url TEXT,
                track_analytics INTEGER NOT NULL DEFAULT 1,
                hit_count INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_slug ON links(slug)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_content (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                locale TEXT NOT NULL,
                destination_url TEXT,
                expired_redirect_url TEXT,
                enabled INTEGER,
                UNIQUE (link_id, locale)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                timestamp INTEGER NOT NULL,
                ip_hash TEXT,
                user_agent TEXT,
                device_type TEXT,
                device_brand TEXT,
                device_model TEXT,
                os_name TEXT,
                os_version TEXT,
                browser TEXT,
                browser_version TEXT,
                browser_engine TEXT,
                client_type TEXT,
                is_mobile_app INTEGER NOT NULL DEFAULT 0,
                is_bot INTEGER NOT NULL DEFAULT 0,
                bot_name TEXT,
                country TEXT,
                city TEXT,
                region TEXT,
                latitude REAL,
                longitude REAL,
                timezone TEXT,
                referrer TEXT,
                source TEXT NOT NULL DEFAULT 'direct',
                language TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_link_ts ON click_events(link_id, timestamp)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clicks_ts ON click_events(timestamp)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn insert_link(&self, link: &NewLink) -> StorageResult<Link> {
        let now = unix_now();

        let result = sqlx::query(
            r#"
            INSERT INTO links (
                code, slug, link_type, destination_url, content_id, content_kind,
                http_status, expires_at, expired_redirect_url, track_analytics,
                enabled, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(&link.code)
        .bind(&link.slug)
        .bind(link.link_type)
        .bind(&link.destination_url)
        .bind(link.linked_content.as_ref().map(|c| c.content_id))
        .bind(link.linked_content.as_ref().map(|c| c.content_kind.as_str()))
        .bind(link.http_status)
        .bind(link.expires_at)
        .bind(&link.expired_redirect_url)
        .bind(link.track_analytics)
        .bind(link.enabled)
        .bind(now)
        .bind(now)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let id = result.last_insert_rowid();
        self.replace_locale_content(id, &link.locale_content)
            .await
            .map_err(StorageError::Other)?;

        self.fetch_link("id = ?", LinkKey::Id(id))
            .await
            .map_err(StorageError::Other)?
            .ok_or(StorageError::NotFound)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        self.fetch_link("id = ?", LinkKey::Id(id)).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Link>> {
        self.fetch_link("slug = ?", LinkKey::Slug(slug)).await
    }

    async fn update_link(&self, link: &Link) -> StorageResult<Link> {
        let now = unix_now();

        let result = sqlx::query(
            r#"
            UPDATE links SET
                code = ?, slug = ?, link_type = ?, destination_url = ?,
                content_id = ?, content_kind = ?, http_status = ?, expires_at = ?,
                expired_redirect_url = ?, track_analytics = ?, enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&link.code)
        .bind(&link.slug)
        .bind(link.link_type)
        .bind(&link.destination_url)
        .bind(link.linked_content.as_ref().map(|c| c.content_id))
        .bind(link.linked_content.as_ref().map(|c| c.content_kind.as_str()))
        .bind(link.http_status)
        .bind(link.expires_at)
        .bind(&link.expired_redirect_url)
        .bind(link.track_analytics)
        .bind(link.enabled)
        .bind(now)
        .bind(link.id)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                StorageError::Conflict
            } else {
                StorageError::Other(e.into())
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        self.replace_locale_content(link.id, &link.locale_content)
            .await
            .map_err(StorageError::Other)?;

        self.fetch_link("id = ?", LinkKey::Id(link.id))
            .await
            .map_err(StorageError::Other)?
            .ok_or(StorageError::NotFound)
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM links WHERE id = ?")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<Link>> {
        let rows = sqlx::query("SELECT * FROM links ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.as_ref())
            .await?;

        let mut links = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut link = Self::link_from_row(row)?;
            link.locale_content = self.load_locale_content(link.id).await?;
            links.push(link);
        }
        Ok(links)
    }

    async fn increment_hits(&self, id: i64, amount: u64) -> Result<()> {
        sqlx::query("UPDATE links SET hit_count = hit_count + ? WHERE id = ?")
            .bind(amount as i64)
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn insert_click(&self, event: &NewClickEvent) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO click_events (
                link_id, timestamp, ip_hash, user_agent,
                device_type, device_brand, device_model,
                os_name, os_version,
                browser, browser_version, browser_engine, client_type,
                is_mobile_app, is_bot, bot_name,
                country, city, region, latitude, longitude, timezone,
                referrer, source, language
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.link_id)
        .bind(event.timestamp)
        .bind(&event.ip_hash)
        .bind(&event.user_agent)
        .bind(&event.device_type)
        .bind(&event.device_brand)
        .bind(&event.device_model)
        .bind(&event.os_name)
        .bind(&event.os_version)
        .bind(&event.browser)
        .bind(&event.browser_version)
        .bind(&event.browser_engine)
        .bind(&event.client_type)
        .bind(event.is_mobile_app)
        .bind(event.is_bot)
        .bind(&event.bot_name)
        .bind(&event.country)
        .bind(&event.city)
        .bind(&event.region)
        .bind(event.latitude)
        .bind(event.longitude)
        .bind(&event.timezone)
        .bind(&event.referrer)
        .bind(&event.source)
        .bind(&event.language)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn count_clicks(&self, window: &TimeWindow, link_id: Option<i64>) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(*) FROM click_events WHERE 1=1");
        push_click_filters(&mut sql, window, link_id, "");
        let query = bind_click_filters!(sqlx::query_scalar::<_, i64>(&sql), window, link_id);
        Ok(query.fetch_one(self.pool.as_ref()).await?)
    }

    async fn count_unique_visitors(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
    ) -> Result<i64> {
        let mut sql = String::from(
            "SELECT COUNT(DISTINCT ip_hash) FROM click_events WHERE ip_hash IS NOT NULL",
        );
        push_click_filters(&mut sql, window, link_id, "");
        let query = bind_click_filters!(sqlx::query_scalar::<_, i64>(&sql), window, link_id);
        Ok(query.fetch_one(self.pool.as_ref()).await?)
    }

    async fn dimension_breakdown(
        &self,
        dimension: ClickDimension,
        window: &TimeWindow,
        link_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<(String, i64)>> {
        let column = dimension.column();
        let mut sql = format!(
            "SELECT {column}, COUNT(*) AS clicks FROM click_events WHERE {column} IS NOT NULL"
        );
        push_click_filters(&mut sql, window, link_id, "");
        sql.push_str(&format!(" GROUP BY {column} ORDER BY clicks DESC LIMIT ?"));

        let query = bind_click_filters!(
            sqlx::query_as::<_, (String, i64)>(&sql),
            window,
            link_id
        )
        .bind(limit);
        Ok(query.fetch_all(self.pool.as_ref()).await?)
    }

    async fn clicks_by_day(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
    ) -> Result<Vec<(String, i64)>> {
        let mut sql = String::from(
            "SELECT strftime('%Y-%m-%d', timestamp, 'unixepoch') AS day, COUNT(*) \
             FROM click_events WHERE 1=1",
        );
        push_click_filters(&mut sql, window, link_id, "");
        sql.push_str(" GROUP BY day ORDER BY day ASC");

        let query = bind_click_filters!(sqlx::query_as::<_, (String, i64)>(&sql), window, link_id);
        Ok(query.fetch_all(self.pool.as_ref()).await?)
    }

    async fn clicks_by_hour(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
    ) -> Result<Vec<(i64, i64)>> {
        let mut sql = String::from(
            "SELECT CAST(strftime('%H', timestamp, 'unixepoch') AS INTEGER) AS hour, COUNT(*) \
             FROM click_events WHERE 1=1",
        );
        push_click_filters(&mut sql, window, link_id, "");
        sql.push_str(" GROUP BY hour ORDER BY hour ASC");

        let query = bind_click_filters!(sqlx::query_as::<_, (i64, i64)>(&sql), window, link_id);
        Ok(query.fetch_all(self.pool.as_ref()).await?)
    }

    async fn count_links(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM links")
            .fetch_one(self.pool.as_ref())
            .await?)
    }

    async fn count_active_links(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM links WHERE enabled = 1")
            .fetch_one(self.pool.as_ref())
            .await?)
    }

    async fn count_links_with_clicks(&self, window: &TimeWindow) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(DISTINCT link_id) FROM click_events WHERE 1=1");
        push_click_filters(&mut sql, window, None, "");
        let query = bind_click_filters!(sqlx::query_scalar::<_, i64>(&sql), window, None::<i64>);
        Ok(query.fetch_one(self.pool.as_ref()).await?)
    }

    async fn top_links(&self, window: &TimeWindow, limit: i64) -> Result<Vec<TopLink>> {
        // Window filters live in the join condition so unclicked links still
        // appear with zero clicks.
        let mut join = String::from("LEFT JOIN click_events a ON a.link_id = l.id");
        if window.start.is_some() {
            join.push_str(" AND a.timestamp >= ?");
        }
        if window.end.is_some() {
            join.push_str(" AND a.timestamp < ?");
        }
        let sql = format!(
            "SELECT l.id, l.code, l.slug, l.destination_url, \
             COUNT(a.id) AS clicks, MAX(a.timestamp) AS last_click \
             FROM links l {join} \
             GROUP BY l.id ORDER BY clicks DESC LIMIT ?"
        );

        let mut query = sqlx::query_as::<_, TopLink>(&sql);
        if let Some(start) = window.start {
            query = query.bind(start);
        }
        if let Some(end) = window.end {
            query = query.bind(end);
        }
        Ok(query.bind(limit).fetch_all(self.pool.as_ref()).await?)
    }

    async fn recent_clicks(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ClickRow>> {
        let mut sql = String::from(
            "SELECT a.timestamp, a.link_id, l.code, l.slug, l.destination_url, \
             a.device_type, a.device_brand, a.device_model, a.os_name, a.os_version, \
             a.browser, a.browser_version, a.country, a.city, a.language, a.source, a.referrer \
             FROM click_events a INNER JOIN links l ON l.id = a.link_id WHERE 1=1",
        );
        push_click_filters(&mut sql, window, link_id, "a.");
        sql.push_str(" ORDER BY a.timestamp DESC LIMIT ?");

        let query = bind_click_filters!(sqlx::query_as::<_, ClickRow>(&sql), window, link_id)
            .bind(limit);
        Ok(query.fetch_all(self.pool.as_ref()).await?)
    }

    async fn export_clicks(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
    ) -> Result<Vec<ClickRow>> {
        let mut sql = String::from(
            "SELECT a.timestamp, a.link_id, l.code, l.slug, l.destination_url, \
             a.device_type, a.device_brand, a.device_model, a.os_name, a.os_version, \
             a.browser, a.browser_version, a.country, a.city, a.language, a.source, a.referrer \
             FROM click_events a INNER JOIN links l ON l.id = a.link_id WHERE 1=1",
        );
        push_click_filters(&mut sql, window, link_id, "a.");
        sql.push_str(" ORDER BY a.timestamp DESC");

        let query = bind_click_filters!(sqlx::query_as::<_, ClickRow>(&sql), window, link_id);
        Ok(query.fetch_all(self.pool.as_ref()).await?)
    }

    async fn delete_clicks_before(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM click_events WHERE timestamp < ?")
            .bind(cutoff)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
