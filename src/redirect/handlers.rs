use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ipnet::IpNet;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::resolver::{resolve, ContentResolver, RedirectOutcome};
use crate::analytics::language::parse_accept_language;
use crate::analytics::{extract_client_ip, ClickJob, ClickRecorder};
use crate::config::RedirectSettings;
use crate::events::{LinkEvent, SinkRegistry};
use crate::models::ClickContext;
use crate::storage::Storage;

pub struct RedirectState {
    pub storage: Arc<dyn Storage>,
    pub content: Arc<dyn ContentResolver>,
    pub recorder: Option<Arc<ClickRecorder>>,
    pub sinks: Arc<SinkRegistry>,
    pub settings: RedirectSettings,
    pub trusted_proxies: Vec<IpNet>,
}

/// Follow a short link.
pub async fn redirect_slug(
    State(state): State<Arc<RedirectState>>,
    Path(slug): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let accept_language = header_str(&headers, header::ACCEPT_LANGUAGE);
    let lang_param = params.get("lang").cloned();
    let locale = lang_param
        .clone()
        .or_else(|| accept_language.as_deref().and_then(parse_accept_language));

    let now = chrono::Utc::now().timestamp();
    let resolution = match resolve(
        &state.storage,
        &state.content,
        &slug,
        locale.as_deref(),
        now,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(slug = %slug, error = %e, "redirect lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    let response = match &resolution.outcome {
        RedirectOutcome::NotFound
        | RedirectOutcome::Disabled
        | RedirectOutcome::NoDestination => {
            tracing::debug!(slug = %slug, outcome = ?resolution.outcome, "redirect fell through");
            redirect_response(302, &state.settings.not_found_redirect_url)
        }
        RedirectOutcome::Expired { redirect_url } => match redirect_url {
            Some(url) => {
                if let Some(link) = &resolution.link {
                    state.sinks.dispatch(&LinkEvent::LinkExpired {
                        link_id: link.id,
                        slug: link.slug.clone(),
                        redirect_url: url.clone(),
                    });
                }
                redirect_response(302, url)
            }
            None => {
                (StatusCode::GONE, state.settings.expired_message.clone()).into_response()
            }
        },
        RedirectOutcome::Success { url, http_status } => {
            if let Some(link) = &resolution.link {
                if let Err(e) = state.storage.increment_hits(link.id, 1).await {
                    tracing::warn!(slug = %slug, error = %e, "failed to buffer hit increment");
                }

                if link.track_analytics {
                    if let Some(recorder) = &state.recorder {
                        let source = match params.get("src").map(String::as_str) {
                            Some("qr") => "qr".to_string(),
                            Some(other) => other.to_string(),
                            None => "direct".to_string(),
                        };
                        let ip =
                            extract_client_ip(&headers, addr.ip(), &state.trusted_proxies);
                        recorder.record(ClickJob {
                            link_id: link.id,
                            ctx: ClickContext {
                                ip: Some(ip),
                                user_agent: header_str(&headers, header::USER_AGENT),
                                referrer: header_str(&headers, header::REFERER),
                                source,
                                locale: locale.clone(),
                                accept_language,
                                lang_param,
                            },
                        });
                    }
                }
            }
            redirect_response(*http_status, url)
        }
    };

    tracing::debug!(
        slug = %slug,
        elapsed_ms = started.elapsed().as_millis() as u64,
        status = response.status().as_u16(),
        "redirect served"
    );

    response
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Redirect with an explicit status; axum's `Redirect` cannot emit 301/308.
fn redirect_response(status: u16, location: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::MOVED_PERMANENTLY);
    match header::HeaderValue::from_str(location) {
        Ok(value) => Response::builder()
            .status(status)
            .header(header::LOCATION, value)
            .body(Body::empty())
            .unwrap_or_else(|_| status.into_response()),
        Err(_) => {
            tracing::warn!(location = %location, "destination is not a valid Location header");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
