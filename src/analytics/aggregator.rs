//! Summary aggregation, export rows, and retention.
//!
//! All heavy lifting happens in SQL through the `Storage` trait; this module
//! turns named date ranges into time windows, assembles the dashboard
//! summary, and runs the retention sweep.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::storage::{ClickDimension, ClickRow, Storage, TimeWindow, TopLink};

const BREAKDOWN_LIMIT: i64 = 10;
const CITY_LIMIT: i64 = 15;
const RECENT_LIMIT: i64 = 20;
const TOP_LINKS_LIMIT: i64 = 20;
// Breakdowns fetch deep so percentages are over the full non-null
// distribution, then truncate to their display cap.
const BREAKDOWN_FETCH_DEPTH: i64 = 1000;

/// Named reporting ranges, midnight-aligned in UTC where bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateRange {
    Today,
    Yesterday,
    Last7Days,
    #[default]
    Last30Days,
    Last90Days,
    All,
}

impl FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            "last7days" => Ok(Self::Last7Days),
            "last30days" => Ok(Self::Last30Days),
            "last90days" => Ok(Self::Last90Days),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown date range '{other}' (expected today, yesterday, last7days, \
                 last30days, last90days, or all)"
            )),
        }
    }
}

impl DateRange {
    pub fn window(self, now: DateTime<Utc>) -> TimeWindow {
        let midnight = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .map(|d| d.timestamp())
            .unwrap_or_else(|| now.timestamp());
        const DAY: i64 = 86_400;

        match self {
            Self::Today => TimeWindow::since(midnight),
            Self::Yesterday => TimeWindow::between(midnight - DAY, midnight),
            Self::Last7Days => TimeWindow::since(now.timestamp() - 7 * DAY),
            Self::Last30Days => TimeWindow::since(now.timestamp() - 30 * DAY),
            Self::Last90Days => TimeWindow::since(now.timestamp() - 90 * DAY),
            Self::All => TimeWindow::ALL,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakdownEntry {
    pub name: String,
    pub clicks: i64,
    /// Share of the non-null rows for this dimension, one decimal place.
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayCount {
    pub date: String,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub devices: Vec<BreakdownEntry>,
    pub browsers: Vec<BreakdownEntry>,
    pub operating_systems: Vec<BreakdownEntry>,
    pub countries: Vec<BreakdownEntry>,
    pub cities: Vec<BreakdownEntry>,
    pub referrers: Vec<BreakdownEntry>,
    pub clicks_by_day: Vec<DayCount>,
    /// Clicks per hour of day, always 24 buckets.
    pub hourly: Vec<i64>,
    /// Hour of day (0-23) with the most clicks, absent with no data.
    pub peak_hour: Option<u8>,
    pub total_links: i64,
    pub active_links: i64,
    pub links_with_clicks: i64,
    pub links_used_percentage: u8,
    pub top_links: Vec<TopLink>,
    pub recent_clicks: Vec<ClickRow>,
}

/// One exported click, flattened for CSV and JSON export adapters.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRow {
    pub date: String,
    pub short_url: String,
    pub destination: String,
    pub device_type: String,
    pub os: String,
    pub browser: String,
    pub country: String,
    pub city: String,
    pub language: String,
    pub source: String,
    pub referrer: String,
}

pub struct Aggregator {
    storage: Arc<dyn Storage>,
}

impl Aggregator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn summary(
        &self,
        range: DateRange,
        link_id: Option<i64>,
    ) -> Result<AnalyticsSummary> {
        let window = range.window(Utc::now());
        let s = &self.storage;

        let total_clicks = s.count_clicks(&window, link_id).await?;
        let unique_visitors = s.count_unique_visitors(&window, link_id).await?;

        let devices = self
            .breakdown(ClickDimension::DeviceType, &window, link_id, BREAKDOWN_LIMIT)
            .await?;
        let browsers = self
            .breakdown(ClickDimension::Browser, &window, link_id, BREAKDOWN_LIMIT)
            .await?;
        let operating_systems = self
            .breakdown(ClickDimension::Os, &window, link_id, BREAKDOWN_LIMIT)
            .await?;
        let countries = self
            .breakdown(ClickDimension::Country, &window, link_id, BREAKDOWN_LIMIT)
            .await?;
        let cities = self
            .breakdown(ClickDimension::City, &window, link_id, CITY_LIMIT)
            .await?;
        let referrers = self
            .breakdown(ClickDimension::Referrer, &window, link_id, BREAKDOWN_LIMIT)
            .await?;

        let clicks_by_day = s
            .clicks_by_day(&window, link_id)
            .await?
            .into_iter()
            .map(|(date, clicks)| DayCount { date, clicks })
            .collect();

        let mut hourly = vec![0i64; 24];
        for (hour, count) in s.clicks_by_hour(&window, link_id).await? {
            if let Ok(hour) = usize::try_from(hour) {
                if hour < 24 {
                    hourly[hour] = count;
                }
            }
        }
        let peak_hour = hourly
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .max_by_key(|(_, count)| **count)
            .map(|(hour, _)| hour as u8);

        let total_links = s.count_links().await?;
        let active_links = s.count_active_links().await?;
        let links_with_clicks = s.count_links_with_clicks(&window).await?;
        let links_used_percentage = if active_links > 0 {
            let pct = (links_with_clicks as f64 / active_links as f64 * 100.0).round();
            pct.min(100.0) as u8
        } else {
            0
        };

        let top_links = s.top_links(&window, TOP_LINKS_LIMIT).await?;
        let recent_clicks = s.recent_clicks(&window, link_id, RECENT_LIMIT).await?;

        Ok(AnalyticsSummary {
            total_clicks,
            unique_visitors,
            devices,
            browsers,
            operating_systems,
            countries,
            cities,
            referrers,
            clicks_by_day,
            hourly,
            peak_hour,
            total_links,
            active_links,
            links_with_clicks,
            links_used_percentage,
            top_links,
            recent_clicks,
        })
    }

    async fn breakdown(
        &self,
        dimension: ClickDimension,
        window: &TimeWindow,
        link_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<BreakdownEntry>> {
        let rows = self
            .storage
            .dimension_breakdown(dimension, window, link_id, BREAKDOWN_FETCH_DEPTH)
            .await?;
        let total: i64 = rows.iter().map(|(_, clicks)| clicks).sum();

        Ok(rows
            .into_iter()
            .take(limit as usize)
            .map(|(name, clicks)| BreakdownEntry {
                name,
                clicks,
                percentage: if total > 0 {
                    (clicks as f64 / total as f64 * 1000.0).round() / 10.0
                } else {
                    0.0
                },
            })
            .collect())
    }

    pub async fn export(&self, range: DateRange, link_id: Option<i64>) -> Result<Vec<ExportRow>> {
        let window = range.window(Utc::now());
        let rows = self.storage.export_clicks(&window, link_id).await?;
        Ok(rows.into_iter().map(export_row).collect())
    }

    /// Delete clicks older than the retention horizon. Retention 0 disables
    /// the sweep entirely.
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now().timestamp() - i64::from(retention_days) * 86_400;
        let deleted = self.storage.delete_clicks_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, retention_days, "pruned old click events");
        }
        Ok(deleted)
    }

    /// Daily retention sweep running until the returned task is aborted.
    pub fn spawn_retention_task(
        storage: Arc<dyn Storage>,
        retention_days: u32,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if retention_days == 0 {
            return None;
        }
        Some(tokio::spawn(async move {
            let aggregator = Aggregator::new(storage);
            let mut interval = tokio::time::interval(Duration::from_secs(86_400));
            loop {
                interval.tick().await;
                if let Err(e) = aggregator.cleanup(retention_days).await {
                    error!(error = %e, "retention sweep failed");
                }
            }
        }))
    }
}

fn export_row(row: ClickRow) -> ExportRow {
    let date = Utc
        .timestamp_opt(row.timestamp, 0)
        .single()
        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();

    ExportRow {
        date,
        short_url: format!("go/{}", row.code),
        destination: row.destination_url.unwrap_or_default(),
        device_type: row.device_type.unwrap_or_default(),
        os: row.os_name.unwrap_or_default(),
        browser: row.browser.unwrap_or_default(),
        country: row.country.unwrap_or_default(),
        city: row.city.unwrap_or_default(),
        language: row.language.unwrap_or_default(),
        source: row.source,
        referrer: row.referrer.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing_round_trips() {
        assert_eq!("today".parse::<DateRange>().unwrap(), DateRange::Today);
        assert_eq!("all".parse::<DateRange>().unwrap(), DateRange::All);
        assert!("lastweek".parse::<DateRange>().is_err());
    }

    #[test]
    fn yesterday_is_one_midnight_aligned_day() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 13, 45, 0).unwrap();
        let window = DateRange::Yesterday.window(now);

        let start = window.start.unwrap();
        let end = window.end.unwrap();
        assert_eq!(end - start, 86_400);
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn all_range_is_unbounded() {
        let window = DateRange::All.window(Utc::now());
        assert_eq!(window, TimeWindow::ALL);
    }

    #[test]
    fn export_rows_use_the_go_prefix() {
        let row = ClickRow {
            timestamp: 1_700_000_000,
            link_id: 1,
            code: "Promo".to_string(),
            slug: "promo".to_string(),
            destination_url: Some("https://example.com".to_string()),
            device_type: None,
            device_brand: None,
            device_model: None,
            os_name: None,
            os_version: None,
            browser: None,
            browser_version: None,
            country: None,
            city: None,
            language: None,
            source: "direct".to_string(),
            referrer: None,
        };
        let exported = export_row(row);
        assert_eq!(exported.short_url, "go/Promo");
        assert_eq!(exported.date, "2023-11-14 22:13:20");
    }
}
