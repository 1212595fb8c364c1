//! Asynchronous click recording.
//!
//! The redirect path only enqueues; a single worker drains a bounded queue
//! and runs the enrichment pipeline (anonymize, geolocate, hash, classify)
//! before persisting. A full queue drops the click with a warning rather
//! than delaying the redirect.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::analytics::classifier::DeviceClassifier;
use crate::analytics::geoip::GeoResolver;
use crate::analytics::language::detect_language;
use crate::analytics::privacy::{anonymize_ip, hash_ip, require_salt};
use crate::config::AnalyticsSettings;
use crate::models::ClickContext;
use crate::storage::{NewClickEvent, Storage, StorageError};

/// One enqueued click, captured on the request path.
#[derive(Debug, Clone)]
pub struct ClickJob {
    pub link_id: i64,
    pub ctx: ClickContext,
}

pub struct ClickRecorder {
    tx: mpsc::Sender<ClickJob>,
    worker: JoinHandle<()>,
}

impl ClickRecorder {
    pub fn spawn(
        storage: Arc<dyn Storage>,
        settings: AnalyticsSettings,
        geo: Arc<GeoResolver>,
        classifier: Arc<DeviceClassifier>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<ClickJob>(settings.queue_capacity);

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let link_id = job.link_id;
                match build_event(job, &settings, &geo, &classifier).await {
                    Ok(event) => {
                        if let Err(e) = storage.insert_click(&event).await {
                            error!(link_id, error = %e, "failed to persist click event");
                        }
                    }
                    Err(e) => {
                        // A misconfigured pipeline must not silently record
                        // partial events.
                        error!(link_id, error = %e, "click event dropped");
                    }
                }
            }
        });

        Self { tx, worker }
    }

    /// Enqueue a click; returns false when the queue is full or closed.
    pub fn record(&self, job: ClickJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(link_id = job.link_id, "click queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(error = %e, "click recorder worker panicked");
        }
    }
}

/// Enrichment pipeline for one click. The order matters: the IP is
/// anonymized before any lookup, so neither the geo provider nor the hash
/// ever sees the full address when anonymization is on.
async fn build_event(
    job: ClickJob,
    settings: &AnalyticsSettings,
    geo: &GeoResolver,
    classifier: &DeviceClassifier,
) -> Result<NewClickEvent, StorageError> {
    let ClickJob { link_id, ctx } = job;
    let timestamp = chrono::Utc::now().timestamp();

    let ip = ctx.ip.map(|ip| {
        if settings.anonymize_ips {
            anonymize_ip(ip)
        } else {
            ip
        }
    });

    let geo_info = match ip {
        Some(ip) if geo.enabled() => geo.lookup(ip).await,
        _ => Default::default(),
    };

    let ip_hash = match ip {
        Some(ip) => {
            let salt = require_salt(settings)?;
            Some(hash_ip(ip, salt))
        }
        None => None,
    };

    let classification = ctx
        .user_agent
        .as_deref()
        .map(|ua| classifier.classify(ua))
        .unwrap_or_default();

    let language = detect_language(&ctx);

    Ok(NewClickEvent {
        link_id,
        timestamp,
        ip_hash,
        user_agent: ctx.user_agent,
        device_type: classification.device_type,
        device_brand: classification.device_brand,
        device_model: classification.device_model,
        os_name: classification.os_name,
        os_version: classification.os_version,
        browser: classification.browser,
        browser_version: classification.browser_version,
        browser_engine: classification.browser_engine,
        client_type: classification.client_type,
        is_mobile_app: classification.is_mobile_app,
        is_bot: classification.is_bot,
        bot_name: classification.bot_name,
        country: geo_info.country,
        city: geo_info.city,
        region: geo_info.region,
        latitude: geo_info.latitude,
        longitude: geo_info.longitude,
        timezone: geo_info.timezone,
        referrer: ctx.referrer,
        source: ctx.source,
        language,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoIpSettings;

    fn fixtures(salt: Option<&str>) -> (AnalyticsSettings, GeoResolver, DeviceClassifier) {
        let settings = AnalyticsSettings {
            ip_hash_salt: salt.map(|s| s.to_string()),
            anonymize_ips: true,
            geo_enabled: true,
            ..Default::default()
        };
        let geo = GeoResolver::from_settings(true, &GeoIpSettings::default()).unwrap();
        (settings, geo, DeviceClassifier::new(60))
    }

    fn job(ip: Option<&str>) -> ClickJob {
        ClickJob {
            link_id: 7,
            ctx: ClickContext {
                ip: ip.map(|s| s.parse().unwrap()),
                user_agent: Some(
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                        .to_string(),
                ),
                source: "direct".to_string(),
                accept_language: Some("en-US,en;q=0.9".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn missing_salt_drops_the_whole_event() {
        let (settings, geo, classifier) = fixtures(None);
        let result = build_event(job(Some("192.168.1.20")), &settings, &geo, &classifier).await;
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[tokio::test]
    async fn ipless_click_records_without_a_hash() {
        let (settings, geo, classifier) = fixtures(None);
        let event = build_event(job(None), &settings, &geo, &classifier)
            .await
            .unwrap();
        assert!(event.ip_hash.is_none());
        assert_eq!(event.browser.as_deref(), Some("Chrome"));
        assert_eq!(event.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn shutdown_drains_queued_clicks() {
        use crate::models::{LinkType, NewLink};
        use crate::storage::{SqliteStorage, TimeWindow};

        let storage: Arc<dyn Storage> = {
            let s = SqliteStorage::new("sqlite::memory:", 2).await.unwrap();
            s.init().await.unwrap();
            Arc::new(s)
        };
        let link = storage
            .insert_link(&NewLink {
                code: "drained".to_string(),
                slug: "drained".to_string(),
                link_type: LinkType::Vanity,
                destination_url: Some("https://example.com".to_string()),
                linked_content: None,
                http_status: 301,
                expires_at: None,
                expired_redirect_url: None,
                track_analytics: true,
                enabled: true,
                locale_content: Default::default(),
            })
            .await
            .unwrap();

        let (settings, geo, classifier) = fixtures(Some("a-salt-value"));
        let recorder = ClickRecorder::spawn(
            Arc::clone(&storage),
            settings,
            Arc::new(geo),
            Arc::new(classifier),
        );
        for _ in 0..3 {
            let mut queued = job(Some("192.168.1.20"));
            queued.link_id = link.id;
            assert!(recorder.record(queued));
        }
        recorder.shutdown().await;

        assert_eq!(
            storage
                .count_clicks(&TimeWindow::ALL, Some(link.id))
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn anonymized_ips_hash_identically_within_a_subnet() {
        let (settings, geo, classifier) = fixtures(Some("a-salt-value"));
        let a = build_event(job(Some("192.168.1.20")), &settings, &geo, &classifier)
            .await
            .unwrap();
        let b = build_event(job(Some("192.168.1.99")), &settings, &geo, &classifier)
            .await
            .unwrap();

        assert!(a.ip_hash.is_some());
        assert_eq!(a.ip_hash, b.ip_hash);
        // Private address, so the fallback location applies.
        assert_eq!(a.country.as_deref(), Some("AE"));
        assert_eq!(a.city.as_deref(), Some("Dubai"));
    }
}
