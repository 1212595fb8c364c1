//! Admin API integration tests: bearer-token gating, link CRUD, validation,
//! and concurrent creation through the HTTP surface.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use golink::analytics::Aggregator;
use golink::api::{create_api_router, AppState};
use golink::config::{AnalyticsSettings, RedirectSettings};
use golink::events::SinkRegistry;
use golink::links::LinkService;
use golink::storage::{SqliteStorage, Storage};

const TOKEN: &str = "test-api-token";

async fn test_app(token: Option<&str>) -> (axum::Router, Arc<dyn Storage>) {
    let storage: Arc<dyn Storage> = {
        let s = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
        s.init().await.unwrap();
        Arc::new(s)
    };

    let links = Arc::new(LinkService::new(
        Arc::clone(&storage),
        RedirectSettings::default(),
        Arc::new(SinkRegistry::new()),
    ));
    let state = Arc::new(AppState {
        storage: Arc::clone(&storage),
        links,
        aggregator: Arc::new(Aggregator::new(Arc::clone(&storage))),
        analytics: AnalyticsSettings::default(),
        token: token.map(String::from),
    });

    (create_api_router(state), storage)
}

fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
    request.header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
}

fn json_request(
    method: &str,
    uri: &str,
    body: Value,
) -> Request<Body> {
    authed(Request::builder().method(method).uri(uri))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let (app, _) = test_app(Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/links").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/links")
                .header(header::AUTHORIZATION, "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unconfigured_token_refuses_all_requests() {
    let (app, _) = test_app(None).await;

    let response = app
        .oneshot(
            authed(Request::builder().uri("/links"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn create_derives_the_slug_from_the_code() {
    let (app, _) = test_app(Some(TOKEN)).await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/links",
            json!({"code": "Summer Sale 2025!", "destination_url": "https://example.com/sale"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["slug"], "summer-sale-2025");
    assert_eq!(body["code"], "Summer Sale 2025!");
    assert_eq!(body["link_type"], "vanity");
    assert_eq!(body["http_status"], 301);
}

#[tokio::test]
async fn create_without_code_generates_one() {
    let (app, _) = test_app(Some(TOKEN)).await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/links",
            json!({"destination_url": "https://example.com"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["link_type"], "auto");
    let slug = body["slug"].as_str().unwrap();
    assert_eq!(slug.len(), 8);
    assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
}

#[tokio::test]
async fn create_rejects_reserved_and_empty_links() {
    let (app, _) = test_app(Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/links",
            json!({"code": "Admin", "destination_url": "https://example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request("POST", "/links", json!({"code": "fine"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_slugs_conflict() {
    let (app, _) = test_app(Some(TOKEN)).await;
    let payload = json!({"code": "taken", "destination_url": "https://example.com"});

    let first = app
        .clone()
        .oneshot(json_request("POST", "/links", payload.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(json_request("POST", "/links", payload))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn concurrent_creates_of_the_same_code_have_one_winner() {
    let (app, _) = test_app(Some(TOKEN)).await;

    let mut handles = vec![];
    for _ in 0..10 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.oneshot(json_request(
                "POST",
                "/links",
                json!({"code": "raced", "destination_url": "https://example.com"}),
            ))
            .await
            .unwrap()
            .status()
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 9);
}

#[tokio::test]
async fn get_update_delete_round_trip() {
    let (app, storage) = test_app(Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/links",
            json!({"code": "lifecycle", "destination_url": "https://example.com/v1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Read it back.
    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().uri("/links/lifecycle"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Rename: the slug moves, the old slug stops resolving.
    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/links/lifecycle",
            json!({"code": "renamed"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["slug"], "renamed");

    assert!(storage.get_by_slug("lifecycle").await.unwrap().is_none());
    assert!(storage.get_by_slug("renamed").await.unwrap().is_some());

    // Delete, then both lookups 404.
    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().method("DELETE").uri("/links/renamed"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            authed(Request::builder().uri("/links/renamed"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_reflects_created_links() {
    let (app, _) = test_app(Some(TOKEN)).await;

    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/links",
                json!({"code": format!("list-{i}"), "destination_url": "https://example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .oneshot(
            authed(Request::builder().uri("/links?limit=2"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn analytics_endpoints_answer_over_http() {
    let (app, storage) = test_app(Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/links",
            json!({"code": "stats", "destination_url": "https://example.com"}),
        ))
        .await
        .unwrap();
    let link_id = body_json(response).await["id"].as_i64().unwrap();

    storage
        .insert_click(&golink::storage::NewClickEvent {
            link_id,
            timestamp: chrono::Utc::now().timestamp(),
            source: "direct".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().uri("/analytics/summary?range=last7days"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_clicks"], 1);

    // Bad range names are a client error.
    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().uri("/analytics/summary?range=fortnight"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // CSV export includes the header row and the hardcoded prefix.
    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().uri("/analytics/export?range=all"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/csv"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let csv_text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(csv_text.contains("go/stats"));

    let response = app
        .oneshot(
            authed(Request::builder().method("POST").uri("/analytics/cleanup"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["deleted"], 0);
    assert_eq!(body["retention_days"], 90);
}
