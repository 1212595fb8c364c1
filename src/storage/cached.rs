use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use tokio::sync::watch;
use tokio::time;

use crate::models::{Link, NewLink};
use crate::storage::{
    ClickDimension, ClickRow, NewClickEvent, Storage, StorageResult, TimeWindow, TopLink,
};

/// Storage wrapper that adds slug-keyed read caching and in-memory hit
/// buffering in front of the database.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    /// Slug -> link lookup cache; negative results are cached too.
    read_cache: Cache<String, Option<Link>>,
    /// Pending `hit_count` increments by link id, flushed in the background.
    hit_buffer: Arc<DashMap<i64, u64>>,
    shutdown_tx: watch::Sender<bool>,
}

impl CachedStorage {
    pub fn new(
        inner: Arc<dyn Storage>,
        max_cache_entries: u64,
        cache_ttl_secs: u64,
        flush_interval_secs: u64,
    ) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(cache_ttl_secs))
            .build();

        let hit_buffer = Arc::new(DashMap::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let storage = Arc::clone(&inner);
        let buffer = Arc::clone(&hit_buffer);
        tokio::spawn(async move {
            // First flush one full period in; `interval` would tick at once.
            let period = Duration::from_secs(flush_interval_secs);
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = flush_hit_buffer(&storage, &buffer).await {
                            tracing::error!("Failed to flush hit buffer: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Shutdown signal received, flushing hit buffer...");
                            if let Err(e) = flush_hit_buffer(&storage, &buffer).await {
                                tracing::error!("Failed to flush hit buffer on shutdown: {}", e);
                            }
                            break;
                        }
                    }
                }
            }
        });

        Self {
            inner,
            read_cache,
            hit_buffer,
            shutdown_tx,
        }
    }

    /// Signal shutdown so buffered hits reach the database.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn buffered_hits(&self, link_id: i64) -> u64 {
        self.hit_buffer
            .get(&link_id)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    async fn invalidate(&self, slug: &str) {
        self.read_cache.invalidate(slug).await;
    }
}

/// Apply each pending increment through the inner storage. A count leaves
/// the buffer only after its write commits, so readers keep seeing buffered
/// hits during the flush and a failed write leaves its count queued for the
/// next pass.
async fn flush_hit_buffer(
    storage: &Arc<dyn Storage>,
    buffer: &Arc<DashMap<i64, u64>>,
) -> Result<()> {
    let pending: Vec<(i64, u64)> = buffer
        .iter()
        .filter(|entry| *entry.value() > 0)
        .map(|entry| (*entry.key(), *entry.value()))
        .collect();

    for (link_id, count) in pending {
        storage.increment_hits(link_id, count).await?;
        // Subtract rather than remove; concurrent increments since the
        // snapshot stay pending.
        if let Some(mut entry) = buffer.get_mut(&link_id) {
            let remaining = entry.saturating_sub(count);
            *entry = remaining;
        }
    }

    buffer.retain(|_, v| *v > 0);
    Ok(())
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn insert_link(&self, link: &NewLink) -> StorageResult<Link> {
        let created = self.inner.insert_link(link).await?;
        self.read_cache
            .insert(created.slug.clone(), Some(created.clone()))
            .await;
        Ok(created)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let mut link = self.inner.get_link(id).await?;
        if let Some(ref mut link) = link {
            link.hit_count += self.buffered_hits(link.id) as i64;
        }
        Ok(link)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Link>> {
        if let Some(cached) = self.read_cache.get(slug).await {
            return Ok(cached);
        }

        let result = self.inner.get_by_slug(slug).await?;
        self.read_cache
            .insert(slug.to_string(), result.clone())
            .await;
        Ok(result)
    }

    async fn update_link(&self, link: &Link) -> StorageResult<Link> {
        // The slug may have changed; drop the entry for the stored slug too.
        if let Some(existing) = self.inner.get_link(link.id).await? {
            self.invalidate(&existing.slug).await;
        }

        let updated = self.inner.update_link(link).await?;
        self.read_cache
            .insert(updated.slug.clone(), Some(updated.clone()))
            .await;
        Ok(updated)
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        let existing = self.inner.get_link(id).await?;
        let deleted = self.inner.delete_link(id).await?;
        if deleted {
            if let Some(link) = existing {
                self.invalidate(&link.slug).await;
            }
            self.hit_buffer.remove(&id);
        }
        Ok(deleted)
    }

    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<Link>> {
        let mut links = self.inner.list_links(limit, offset).await?;
        for link in &mut links {
            link.hit_count += self.buffered_hits(link.id) as i64;
        }
        Ok(links)
    }

    async fn increment_hits(&self, id: i64, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        self.hit_buffer
            .entry(id)
            .and_modify(|count| *count += amount)
            .or_insert(amount);

        Ok(())
    }

    async fn insert_click(&self, event: &NewClickEvent) -> Result<i64> {
        self.inner.insert_click(event).await
    }

    async fn count_clicks(&self, window: &TimeWindow, link_id: Option<i64>) -> Result<i64> {
        self.inner.count_clicks(window, link_id).await
    }

    async fn count_unique_visitors(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
    ) -> Result<i64> {
        self.inner.count_unique_visitors(window, link_id).await
    }

    async fn dimension_breakdown(
        &self,
        dimension: ClickDimension,
        window: &TimeWindow,
        link_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<(String, i64)>> {
        self.inner
            .dimension_breakdown(dimension, window, link_id, limit)
            .await
    }

    async fn clicks_by_day(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
    ) -> Result<Vec<(String, i64)>> {
        self.inner.clicks_by_day(window, link_id).await
    }

    async fn clicks_by_hour(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
    ) -> Result<Vec<(i64, i64)>> {
        self.inner.clicks_by_hour(window, link_id).await
    }

    async fn count_links(&self) -> Result<i64> {
        self.inner.count_links().await
    }

    async fn count_active_links(&self) -> Result<i64> {
        self.inner.count_active_links().await
    }

    async fn count_links_with_clicks(&self, window: &TimeWindow) -> Result<i64> {
        self.inner.count_links_with_clicks(window).await
    }

    async fn top_links(&self, window: &TimeWindow, limit: i64) -> Result<Vec<TopLink>> {
        self.inner.top_links(window, limit).await
    }

    async fn recent_clicks(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ClickRow>> {
        self.inner.recent_clicks(window, link_id, limit).await
    }

    async fn export_clicks(
        &self,
        window: &TimeWindow,
        link_id: Option<i64>,
    ) -> Result<Vec<ClickRow>> {
        self.inner.export_clicks(window, link_id).await
    }

    async fn delete_clicks_before(&self, cutoff: i64) -> Result<u64> {
        self.inner.delete_clicks_before(cutoff).await
    }
}
