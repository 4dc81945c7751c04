//! End-to-end tests for the HTTP API
//!
//! Requests go through the full router (session and client IP middleware
//! included) via `tower::ServiceExt::oneshot`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use mopsagent::analytics::{StatsRefresher, VisitTracker};
use mopsagent::api::{create_api_router, AppState};
use mopsagent::auth::AuthService;
use mopsagent::chat::{ChatCompletion, ChatError, ChatMessage};
use mopsagent::config::{
    AnalyticsConfig, AuthConfig, AuthMode, JwtConfig, TrackingConfig, TrustedProxyMode,
};
use mopsagent::models::{EmailSignup, NewVisit, VisitRecord};
use mopsagent::signup::SignupService;
use mopsagent::storage::{format_timestamp, SqliteStorage, Storage, StorageResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "super-secret-jwt-token-with-at-least-32-characters";
const ISSUER: &str = "https://project.supabase.co/auth/v1";

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn analytics_config() -> AnalyticsConfig {
    AnalyticsConfig {
        geoip_city_db_path: None,
        geoip_service_url: "http://127.0.0.1:9".to_string(),
        geoip_cache_entries: 100,
        geoip_cache_ttl_secs: 60,
        ip_anonymization: false,
        trusted_proxy_mode: TrustedProxyMode::Cloudflare,
        trusted_proxies: vec![],
        num_trusted_proxies: None,
    }
}

async fn auth_service(mode: AuthMode) -> Arc<AuthService> {
    let jwt = matches!(mode, AuthMode::Jwt).then(|| JwtConfig {
        issuer_url: ISSUER.to_string(),
        audience: "authenticated".to_string(),
        jwks_url: None,
        shared_secret: Some(SECRET.to_string()),
        jwks_cache_ttl_secs: 300,
    });
    Arc::new(AuthService::new(AuthConfig { mode, jwt }).await.unwrap())
}

fn build_router(
    storage: Arc<dyn Storage>,
    auth: Arc<AuthService>,
    chat: Option<Arc<dyn ChatCompletion>>,
) -> Router {
    let state = AppState {
        tracker: VisitTracker::new(
            Arc::clone(&storage),
            None,
            &TrackingConfig::default(),
            false,
        ),
        signups: SignupService::new(Arc::clone(&storage)),
        chat,
        refresher: StatsRefresher::new(storage),
        auth,
        analytics_config: analytics_config(),
    };
    create_api_router(Arc::new(state))
}

async fn test_router(storage: Arc<dyn Storage>) -> Router {
    build_router(storage, auth_service(AuthMode::None).await, None)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn visit(page: &str, at: DateTime<Utc>, ip: &str, country: Option<&str>) -> NewVisit {
    NewVisit {
        page: page.to_string(),
        timestamp: format_timestamp(at),
        ip_address: Some(ip.to_string()),
        country: country.map(str::to_string),
        ..Default::default()
    }
}

/// Store whose reads always fail
struct UnavailableStorage;

#[async_trait]
impl Storage for UnavailableStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn record_visit(&self, _visit: &NewVisit) -> Result<VisitRecord> {
        Err(anyhow!("database is down"))
    }

    async fn visits_since(&self, _since: DateTime<Utc>) -> Result<Vec<VisitRecord>> {
        Err(anyhow!("database is down"))
    }

    async fn create_signup(&self, _email: &str, _source: &str) -> StorageResult<EmailSignup> {
        Err(anyhow!("database is down").into())
    }

    async fn list_signups(&self, _limit: i64, _offset: i64) -> Result<Vec<EmailSignup>> {
        Err(anyhow!("database is down"))
    }
}

struct EchoChat;

#[async_trait]
impl ChatCompletion for EchoChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        match messages.last() {
            Some(last) => Ok(format!("echo: {}", last.content)),
            None => Err(ChatError::EmptyConversation),
        }
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = test_router(create_test_storage().await).await;

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "OK");
}

#[tokio::test]
async fn test_analytics_empty_store_returns_zeroed_stats() {
    let app = test_router(create_test_storage().await).await;

    let response = app.oneshot(get("/api/analytics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["windowDays"], 7);
    assert_eq!(body["stats"]["totalVisits"], 0);
    assert_eq!(body["stats"]["uniqueVisitors"], 0);
    assert_eq!(body["stats"]["dailyVisits"], json!([]));
    assert_eq!(body["stats"]["topCountries"], json!([]));
    assert_eq!(body["stats"]["topReferrers"], json!([]));
}

#[tokio::test]
async fn test_analytics_aggregates_stored_visits() {
    let storage = create_test_storage().await;
    let now = Utc::now();

    storage
        .record_visit(&visit("/", now - Duration::hours(1), "203.0.113.1", Some("United States")))
        .await
        .unwrap();
    storage
        .record_visit(&visit("/pricing", now - Duration::hours(2), "203.0.113.1", Some("United States")))
        .await
        .unwrap();
    storage
        .record_visit(&NewVisit {
            referrer: Some("https://google.com".to_string()),
            ..visit("/", now - Duration::hours(3), "198.51.100.2", Some("Germany"))
        })
        .await
        .unwrap();
    // Outside a week, inside a month
    storage
        .record_visit(&visit("/", now - Duration::days(20), "192.0.2.9", None))
        .await
        .unwrap();

    let app = test_router(Arc::clone(&storage)).await;
    let response = app.clone().oneshot(get("/api/analytics?range=week")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let stats = &body["stats"];
    assert_eq!(stats["totalVisits"], 3);
    assert_eq!(stats["uniqueVisitors"], 2);
    assert_eq!(
        stats["topCountries"],
        json!([
            { "country": "United States", "visits": 2 },
            { "country": "Germany", "visits": 1 },
        ])
    );
    assert_eq!(
        stats["topReferrers"],
        json!([
            { "referrer": "Direct", "visits": 2 },
            { "referrer": "https://google.com", "visits": 1 },
        ])
    );
    let daily_total: u64 = stats["dailyVisits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["visits"].as_u64().unwrap())
        .sum();
    assert_eq!(daily_total, 3);

    let response = app.oneshot(get("/api/analytics?range=month")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["windowDays"], 30);
    assert_eq!(body["stats"]["totalVisits"], 4);
    assert_eq!(body["stats"]["uniqueVisitors"], 3);
}

#[tokio::test]
async fn test_analytics_rejects_bad_window() {
    let app = test_router(create_test_storage().await).await;

    let response = app.clone().oneshot(get("/api/analytics?range=year")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.clone().oneshot(get("/api/analytics?days=0")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/api/analytics?days=14")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["windowDays"], 14);
}

#[tokio::test]
async fn test_analytics_storage_failure_reports_no_data() {
    let app = test_router(Arc::new(UnavailableStorage)).await;

    let response = app.clone().oneshot(get("/api/analytics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "No data available yet");

    let response = app.oneshot(get("/api/analytics/current")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "no_data");
}

#[tokio::test]
async fn test_current_analytics_before_and_after_refresh() {
    let app = test_router(create_test_storage().await).await;

    let response = app.clone().oneshot(get("/api/analytics/current")).await.unwrap();
    assert_eq!(body_json(response).await["state"], "loading");

    app.clone().oneshot(get("/api/analytics")).await.unwrap();

    let response = app.oneshot(get("/api/analytics/current")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["state"], "ready");
    assert_eq!(body["stats"]["totalVisits"], 0);
}

#[tokio::test]
async fn test_track_visit_records_and_ignores() {
    let storage = create_test_storage().await;
    let app = test_router(Arc::clone(&storage)).await;

    let mut request = post_json("/api/visits", json!({ "page": "/", "referrer": "https://t.co/x" }));
    request
        .headers_mut()
        .insert("cf-connecting-ip", "203.0.113.50".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["status"], "recorded");

    let mut request = post_json("/api/visits", json!({ "page": "/" }));
    request
        .headers_mut()
        .insert("cf-connecting-ip", "172.58.135.90".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["reason"], "blocked_ip");

    let response = app
        .oneshot(post_json("/api/visits", json!({ "page": "  " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let visits = storage
        .visits_since(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].ip_address.as_deref(), Some("203.0.113.50"));
    assert_eq!(visits[0].referrer.as_deref(), Some("https://t.co/x"));
}

#[tokio::test]
async fn test_signup_then_duplicate() {
    let app = test_router(create_test_storage().await).await;

    let response = app
        .clone()
        .oneshot(post_json("/api/signups", json!({ "email": "a@b.co" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["signup"]["email"], "a@b.co");
    assert_eq!(body["signup"]["source"], "landing_page");

    let response = app
        .clone()
        .oneshot(post_json("/api/signups", json!({ "email": " A@B.co " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        body_json(response).await["error"],
        "This email is already signed up!"
    );

    let response = app
        .oneshot(post_json("/api/signups", json!({ "email": "nope" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_unconfigured_and_configured() {
    let storage = create_test_storage().await;

    let app = test_router(Arc::clone(&storage)).await;
    let response = app
        .oneshot(post_json(
            "/api/chat",
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let app = build_router(
        storage,
        auth_service(AuthMode::None).await,
        Some(Arc::new(EchoChat)),
    );
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/chat",
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["reply"], "echo: hi");

    let response = app
        .oneshot(post_json("/api/chat", json!({ "messages": [] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

fn bearer(request: Request<Body>, token: &str) -> Request<Body> {
    let (mut parts, body) = request.into_parts();
    parts.headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    Request::from_parts(parts, body)
}

fn access_token() -> String {
    encode(
        &Header::default(),
        &json!({
            "sub": "user-123",
            "email": "ops@example.com",
            "iss": ISSUER,
            "aud": "authenticated",
            "exp": Utc::now().timestamp() + 3600,
        }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_jwt_mode_dashboard_requires_session() {
    let storage = create_test_storage().await;
    let app = build_router(Arc::clone(&storage), auth_service(AuthMode::Jwt).await, None);
    let token = access_token();

    let response = app.clone().oneshot(get("/api/analytics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Public endpoints stay open to anonymous visitors
    let response = app
        .clone()
        .oneshot(post_json("/api/signups", json!({ "email": "x@y.io" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(bearer(get("/api/analytics"), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(bearer(get("/api/session"), &token))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user"]["id"], "user-123");

    let response = app
        .clone()
        .oneshot(get("/api/analytics"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(bearer(post_json("/api/session/sign-out", json!({})), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Signed out");

    // Signed-out token no longer works
    let response = app
        .oneshot(bearer(get("/api/analytics"), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_out_token_still_records_visit_anonymously() {
    let storage = create_test_storage().await;
    let app = build_router(Arc::clone(&storage), auth_service(AuthMode::Jwt).await, None);
    let token = access_token();

    let response = app
        .clone()
        .oneshot(bearer(post_json("/api/session/sign-out", json!({})), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut request = bearer(post_json("/api/visits", json!({ "page": "/pricing" })), &token);
    request
        .headers_mut()
        .insert("cf-connecting-ip", "203.0.113.60".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(bearer(post_json("/api/signups", json!({ "email": "late@example.com" })), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let visits = storage
        .visits_since(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].page, "/pricing");
    assert_eq!(visits[0].user_id, None);
}

#[tokio::test]
async fn test_invalid_token_is_anonymous_outside_dashboard() {
    let storage = create_test_storage().await;
    let app = build_router(Arc::clone(&storage), auth_service(AuthMode::Jwt).await, None);

    let response = app
        .clone()
        .oneshot(bearer(get("/api/session"), "not-a-jwt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["authenticated"], false);

    let response = app
        .clone()
        .oneshot(bearer(post_json("/api/visits", json!({ "page": "/" })), "not-a-jwt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(bearer(get("/api/analytics"), "not-a-jwt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let visits = storage
        .visits_since(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].user_id, None);
}

#[tokio::test]
async fn test_session_anonymous_when_auth_disabled() {
    let app = test_router(create_test_storage().await).await;

    let response = app.oneshot(get("/api/session")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["user"], Value::Null);
}
