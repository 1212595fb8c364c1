use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use golink::analytics::{Aggregator, ClickRecorder, DeviceClassifier, GeoResolver};
use golink::api::{self, AppState};
use golink::config::Settings;
use golink::events::{SinkRegistry, TracingSink};
use golink::links::LinkService;
use golink::redirect::{self, NullContentResolver, RedirectState};
use golink::storage::{CachedStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Settings::load()?;
    info!("Loaded configuration");

    info!("Using SQLite storage: {}", settings.database.url);
    let sqlite = Arc::new(
        SqliteStorage::new(&settings.database.url, settings.database.max_connections).await?,
    );
    sqlite.init().await?;
    info!("Database initialized");

    let cached = Arc::new(CachedStorage::new(
        sqlite,
        settings.cache.capacity,
        settings.cache.link_ttl_secs,
        settings.analytics.flush_interval_secs,
    ));
    let storage: Arc<dyn Storage> = Arc::clone(&cached) as Arc<dyn Storage>;

    let sinks = Arc::new(SinkRegistry::new());
    sinks.register(Arc::new(TracingSink));

    let links = Arc::new(LinkService::new(
        Arc::clone(&storage),
        settings.redirect.clone(),
        Arc::clone(&sinks),
    ));
    let aggregator = Arc::new(Aggregator::new(Arc::clone(&storage)));

    let recorder = if settings.analytics.enabled {
        let geo = Arc::new(GeoResolver::from_settings(
            settings.analytics.geo_enabled,
            &settings.geoip,
        )?);
        let classifier = Arc::new(DeviceClassifier::new(settings.analytics.ua_cache_ttl_secs));
        Some(Arc::new(ClickRecorder::spawn(
            Arc::clone(&storage),
            settings.analytics.clone(),
            geo,
            classifier,
        )))
    } else {
        info!("Click analytics disabled");
        None
    };

    let retention_task = Aggregator::spawn_retention_task(
        Arc::clone(&storage),
        settings.analytics.retention_days,
    );

    if settings.api.token.is_none() {
        info!("No API token configured - admin API requests will be refused");
    }

    let api_state = Arc::new(AppState {
        storage: Arc::clone(&storage),
        links,
        aggregator,
        analytics: settings.analytics.clone(),
        token: settings.api.token.clone(),
    });
    let redirect_state = Arc::new(RedirectState {
        storage: Arc::clone(&storage),
        content: Arc::new(NullContentResolver),
        recorder: recorder.clone(),
        sinks,
        settings: settings.redirect.clone(),
        trusted_proxies: settings.trusted_proxy_nets(),
    });

    let app = Router::new()
        .merge(redirect::create_redirect_router(redirect_state))
        .nest(
            "/api",
            api::create_api_router(api_state).layer(CorsLayer::permissive()),
        );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Drain buffered state before exit: pending clicks first, then hits.
    if let Some(handle) = retention_task {
        handle.abort();
    }
    if let Some(recorder) = recorder {
        match Arc::into_inner(recorder) {
            Some(recorder) => recorder.shutdown().await,
            None => tracing::warn!(
                "click recorder still shared at shutdown, queued events may be dropped"
            ),
        }
    }
    cached.shutdown();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    }
}
