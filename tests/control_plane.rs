//! End-to-end router tests: the data-plane fallback against an installed
//! route table, and the admin control plane's auth gate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use gateproxy::audit::AuditStore;
use gateproxy::auth::TokenSigner;
use gateproxy::clock::SystemClock;
use gateproxy::config::{AdminRateLimitSettings, BodySizeSettings, Config, CorsSettings, ForwarderSettings, RateLimitSettings};
use gateproxy::forwarder::Forwarder;
use gateproxy::ratelimit::{AdminLimiter, DataPlaneLimiter};
use gateproxy::routing::{self, ResolvedRoute, Route, RouteSnapshot};
use gateproxy::ssrf::ResolvedTarget;
use gateproxy::state::{AdminCredential, AppState};
use gateproxy::web;
use tower::ServiceExt;

static TEST_DB_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

fn test_peer() -> SocketAddr {
    "203.0.113.9:54321".parse().unwrap()
}

async fn test_state(routes: Vec<ResolvedRoute>) -> AppState {
    let n = TEST_DB_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let audit_path = std::env::temp_dir().join(format!("gateproxy-test-{}-{n}.db", std::process::id()));
    let audit = AuditStore::connect(audit_path.to_str().unwrap())
        .await
        .expect("open test audit store");
    let db_pool = audit.pool().clone();

    let config = Config {
        log_level: "info".to_string(),
        listen_addr: "127.0.0.1".to_string(),
        listen_port_http: 0,
        listen_port_https: None,
        shutdown_timeout_secs: 5,
        trusted_proxy_hops: 0,
        body_size: BodySizeSettings { max_bytes: 1024 * 1024 },
        rate_limit: RateLimitSettings { requests_per_minute: 1000 },
        admin_rate_limit: AdminRateLimitSettings {
            attempts_per_window: 1000,
            window_seconds: 60,
            block_seconds: 60,
        },
        forwarder: ForwarderSettings::default(),
        cors: CorsSettings::default(),
        routes: vec![],
    };

    let clock = Arc::new(SystemClock);
    let password_hash = gateproxy::auth::password::hash("hunter2").unwrap();

    AppState {
        config: Arc::new(config.clone()),
        routes: routing::new_shared(RouteSnapshot::from_resolved(routes)),
        reload_guard: Arc::new(tokio::sync::Mutex::new(())),
        data_limiter: Arc::new(DataPlaneLimiter::new(clock.clone())),
        admin_limiter: Arc::new(AdminLimiter::new(clock.clone())),
        forwarder: Arc::new(Forwarder::new(&config.forwarder)),
        audit: Arc::new(audit),
        db_pool,
        token_signer: Arc::new(TokenSigner::new(b"test-signing-key-0123456789".to_vec())),
        admin_credential: Arc::new(AdminCredential {
            username: "admin".to_string(),
            password_hash,
        }),
        clock,
        started_at: Instant::now(),
    }
}

fn fake_route(prefix: &str) -> ResolvedRoute {
    ResolvedRoute {
        route: Route {
            prefix: prefix.to_string(),
            upstream: "http://upstream.invalid".to_string(),
            strip_path: false,
        },
        target: ResolvedTarget { addrs: vec![] },
    }
}

fn basic_auth_header(username: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

#[tokio::test]
async fn health_check_is_unauthenticated() {
    let state = test_state(vec![]).await;
    let router = web::create_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unmatched_path_returns_not_found() {
    let state = test_state(vec![fake_route("/api")]).await;
    let router = web::create_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/nowhere")
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_reject_without_credentials() {
    let state = test_state(vec![]).await;
    let router = web::create_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/admin/status")
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_accept_shared_secret() {
    let state = test_state(vec![fake_route("/api")]).await;
    let router = web::create_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/admin/status")
                .header(header::AUTHORIZATION, basic_auth_header("admin", "hunter2"))
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_config_requires_auth_and_dumps_policy() {
    let state = test_state(vec![]).await;
    let router = web::create_router(state);

    let unauthed = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/config")
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unauthed.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/admin/config")
                .header(header::AUTHORIZATION, basic_auth_header("admin", "hunter2"))
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["rate_limit"]["requests_per_minute"], 1000);
}

#[tokio::test]
async fn login_then_bearer_token_reaches_admin_routes() {
    let state = test_state(vec![]).await;
    let router = web::create_router(state);

    let login_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .extension(ConnectInfo(test_peer()))
                .body(Body::from(r#"{"username":"admin","password":"hunter2"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login_response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(login_response.into_body(), usize::MAX)
        .await
        .unwrap();
    let token_pair: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let access_token = token_pair["access_token"].as_str().unwrap();

    let status_response = router
        .oneshot(
            Request::builder()
                .uri("/admin/routes")
                .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(status_response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let state = test_state(vec![]).await;
    let router = web::create_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/admin/status")
                .header(header::AUTHORIZATION, basic_auth_header("admin", "wrong"))
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
