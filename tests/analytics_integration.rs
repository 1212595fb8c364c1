//! Aggregation integration tests: breakdowns, usage percentages, peak hour,
//! export shape, and retention.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use golink::analytics::{Aggregator, DateRange};
use golink::models::{LinkType, NewLink};
use golink::storage::{NewClickEvent, SqliteStorage, Storage, TimeWindow};

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn new_link(slug: &str) -> NewLink {
    NewLink {
        code: slug.to_string(),
        slug: slug.to_string(),
        link_type: LinkType::Vanity,
        destination_url: Some(format!("https://example.com/{slug}")),
        linked_content: None,
        http_status: 301,
        expires_at: None,
        expired_redirect_url: None,
        track_analytics: true,
        enabled: true,
        locale_content: HashMap::new(),
    }
}

fn click(link_id: i64, timestamp: i64) -> NewClickEvent {
    NewClickEvent {
        link_id,
        timestamp,
        source: "direct".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn breakdowns_exclude_null_dimensions() {
    let storage = create_test_storage().await;
    let link = storage.insert_link(&new_link("mix")).await.unwrap();
    let now = Utc::now().timestamp();

    for device in [Some("desktop"), Some("desktop"), Some("mobile"), None] {
        let mut event = click(link.id, now);
        event.device_type = device.map(String::from);
        storage.insert_click(&event).await.unwrap();
    }

    let summary = Aggregator::new(Arc::clone(&storage))
        .summary(DateRange::All, None)
        .await
        .unwrap();

    assert_eq!(summary.total_clicks, 4);
    // Only the non-null device rows appear, and percentages are over the
    // non-null sum (3), not the click total (4).
    assert_eq!(summary.devices.len(), 2);
    assert_eq!(summary.devices[0].name, "desktop");
    assert_eq!(summary.devices[0].clicks, 2);
    assert_eq!(summary.devices[0].percentage, 66.7);
    assert_eq!(summary.devices[1].percentage, 33.3);
    assert!(summary.devices.iter().all(|d| d.name != ""));
}

#[tokio::test]
async fn unique_visitors_count_distinct_hashes() {
    let storage = create_test_storage().await;
    let link = storage.insert_link(&new_link("uniq")).await.unwrap();
    let now = Utc::now().timestamp();

    for hash in [Some("aaa"), Some("aaa"), Some("bbb"), None] {
        let mut event = click(link.id, now);
        event.ip_hash = hash.map(String::from);
        storage.insert_click(&event).await.unwrap();
    }

    let summary = Aggregator::new(Arc::clone(&storage))
        .summary(DateRange::All, None)
        .await
        .unwrap();

    assert_eq!(summary.total_clicks, 4);
    assert_eq!(summary.unique_visitors, 2);
}

#[tokio::test]
async fn peak_hour_tracks_the_busiest_hour() {
    let storage = create_test_storage().await;
    let link = storage.insert_link(&new_link("hours")).await.unwrap();

    // 2023-11-14 22:13:20 UTC, then two clicks an hour later.
    let base = 1_700_000_000;
    storage.insert_click(&click(link.id, base)).await.unwrap();
    storage
        .insert_click(&click(link.id, base + 3_600))
        .await
        .unwrap();
    storage
        .insert_click(&click(link.id, base + 3_700))
        .await
        .unwrap();

    let summary = Aggregator::new(Arc::clone(&storage))
        .summary(DateRange::All, None)
        .await
        .unwrap();

    assert_eq!(summary.peak_hour, Some(23));
    assert_eq!(summary.hourly.len(), 24);
    assert_eq!(summary.hourly[22], 1);
    assert_eq!(summary.hourly[23], 2);
    assert_eq!(summary.clicks_by_day.len(), 1);
    assert_eq!(summary.clicks_by_day[0].date, "2023-11-14");
    assert_eq!(summary.clicks_by_day[0].clicks, 3);
}

#[tokio::test]
async fn usage_percentage_divides_by_active_links() {
    let storage = create_test_storage().await;
    let clicked = storage.insert_link(&new_link("clicked")).await.unwrap();
    storage.insert_link(&new_link("idle")).await.unwrap();
    let mut disabled = new_link("disabled");
    disabled.enabled = false;
    storage.insert_link(&disabled).await.unwrap();

    storage
        .insert_click(&click(clicked.id, Utc::now().timestamp()))
        .await
        .unwrap();

    let summary = Aggregator::new(Arc::clone(&storage))
        .summary(DateRange::All, None)
        .await
        .unwrap();

    assert_eq!(summary.total_links, 3);
    assert_eq!(summary.active_links, 2);
    assert_eq!(summary.links_with_clicks, 1);
    // 1 of 2 active links clicked.
    assert_eq!(summary.links_used_percentage, 50);
}

#[tokio::test]
async fn usage_percentage_caps_at_one_hundred() {
    let storage = create_test_storage().await;
    // A disabled link with clicks makes with_clicks exceed active.
    let mut off = new_link("off-but-clicked");
    off.enabled = false;
    let off = storage.insert_link(&off).await.unwrap();
    let on = storage.insert_link(&new_link("on")).await.unwrap();

    let now = Utc::now().timestamp();
    storage.insert_click(&click(off.id, now)).await.unwrap();
    storage.insert_click(&click(on.id, now)).await.unwrap();

    let summary = Aggregator::new(Arc::clone(&storage))
        .summary(DateRange::All, None)
        .await
        .unwrap();

    assert_eq!(summary.active_links, 1);
    assert_eq!(summary.links_with_clicks, 2);
    assert_eq!(summary.links_used_percentage, 100);
}

#[tokio::test]
async fn date_ranges_filter_clicks() {
    let storage = create_test_storage().await;
    let link = storage.insert_link(&new_link("windowed")).await.unwrap();
    let now = Utc::now().timestamp();

    storage.insert_click(&click(link.id, now)).await.unwrap();
    storage
        .insert_click(&click(link.id, now - 40 * 86_400))
        .await
        .unwrap();

    let aggregator = Aggregator::new(Arc::clone(&storage));
    let recent = aggregator.summary(DateRange::Last30Days, None).await.unwrap();
    let all = aggregator.summary(DateRange::All, None).await.unwrap();

    assert_eq!(recent.total_clicks, 1);
    assert_eq!(all.total_clicks, 2);
}

#[tokio::test]
async fn per_link_summary_ignores_other_links() {
    let storage = create_test_storage().await;
    let a = storage.insert_link(&new_link("link-a")).await.unwrap();
    let b = storage.insert_link(&new_link("link-b")).await.unwrap();
    let now = Utc::now().timestamp();

    storage.insert_click(&click(a.id, now)).await.unwrap();
    storage.insert_click(&click(a.id, now)).await.unwrap();
    storage.insert_click(&click(b.id, now)).await.unwrap();

    let summary = Aggregator::new(Arc::clone(&storage))
        .summary(DateRange::All, Some(a.id))
        .await
        .unwrap();

    assert_eq!(summary.total_clicks, 2);
    assert!(summary
        .recent_clicks
        .iter()
        .all(|row| row.link_id == a.id));
}

#[tokio::test]
async fn top_links_include_unclicked_links_with_zero() {
    let storage = create_test_storage().await;
    let busy = storage.insert_link(&new_link("busy")).await.unwrap();
    storage.insert_link(&new_link("quiet")).await.unwrap();

    let now = Utc::now().timestamp();
    storage.insert_click(&click(busy.id, now)).await.unwrap();
    storage.insert_click(&click(busy.id, now)).await.unwrap();

    let summary = Aggregator::new(Arc::clone(&storage))
        .summary(DateRange::All, None)
        .await
        .unwrap();

    assert_eq!(summary.top_links.len(), 2);
    assert_eq!(summary.top_links[0].slug, "busy");
    assert_eq!(summary.top_links[0].clicks, 2);
    assert_eq!(summary.top_links[1].clicks, 0);
    assert!(summary.top_links[1].last_click.is_none());
}

#[tokio::test]
async fn export_rows_carry_the_short_url_prefix() {
    let storage = create_test_storage().await;
    let link = storage.insert_link(&new_link("exported")).await.unwrap();
    let mut event = click(link.id, 1_700_000_000);
    event.country = Some("DE".to_string());
    event.source = "qr".to_string();
    storage.insert_click(&event).await.unwrap();

    let rows = Aggregator::new(Arc::clone(&storage))
        .export(DateRange::All, None)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].short_url, "go/exported");
    assert_eq!(rows[0].country, "DE");
    assert_eq!(rows[0].source, "qr");
    assert_eq!(rows[0].date, "2023-11-14 22:13:20");
}

#[tokio::test]
async fn cleanup_prunes_only_past_the_horizon() {
    let storage = create_test_storage().await;
    let link = storage.insert_link(&new_link("pruned")).await.unwrap();
    let now = Utc::now().timestamp();

    storage.insert_click(&click(link.id, now)).await.unwrap();
    storage
        .insert_click(&click(link.id, now - 100 * 86_400))
        .await
        .unwrap();

    let aggregator = Aggregator::new(Arc::clone(&storage));
    let deleted = aggregator.cleanup(90).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(
        storage.count_clicks(&TimeWindow::ALL, None).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn zero_retention_disables_cleanup() {
    let storage = create_test_storage().await;
    let link = storage.insert_link(&new_link("kept")).await.unwrap();
    storage
        .insert_click(&click(link.id, 1_000))
        .await
        .unwrap();

    let deleted = Aggregator::new(Arc::clone(&storage))
        .cleanup(0)
        .await
        .unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(
        storage.count_clicks(&TimeWindow::ALL, None).await.unwrap(),
        1
    );
}
