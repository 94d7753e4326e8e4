//! Web server router construction: the admin/audit/auth control plane
//! nested under its own path, the proxy data plane as the fallback.

use std::time::Duration;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::response::Response;
use axum::routing::{delete, get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;
use crate::web::middleware::admin_rate_limit::AdminRateLimitLayer;
use crate::web::middleware::audit_recorder::AuditRecorderLayer;
use crate::web::middleware::rate_limit::RateLimitLayer;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::middleware::security_headers::SecurityHeadersLayer;
use crate::web::{admin, audit, auth_routes, proxy, status};

pub mod cache {
    pub const ADMIN: &str = "private, no-store, must-revalidate";
}

pub fn create_router(app_state: AppState) -> Router {
    let admin_router = Router::new()
        .route("/admin/status", get(admin::status))
        .route("/admin/routes", get(admin::list_routes))
        .route("/admin/config", get(admin::get_config))
        .route("/admin/reload", post(admin::reload))
        .route("/admin/ratelimit/{ip}", get(admin::rate_limit_stats))
        .route("/admin/ratelimit/{ip}/clear", post(admin::rate_limit_clear))
        .route("/admin/ratelimit/{ip}/block", post(admin::rate_limit_block))
        .route("/audit/logs", get(audit::logs))
        .route("/audit/stats", get(audit::stats))
        .route("/auth/login", post(auth_routes::login))
        .route("/auth/refresh", post(auth_routes::refresh))
        .route("/auth/keys", get(auth_routes::list_keys).post(auth_routes::create_key))
        .route("/auth/keys/{id}", delete(auth_routes::delete_key))
        .route("/auth/keys/{id}/revoke", post(auth_routes::revoke_key))
        .layer(AdminRateLimitLayer::new(app_state.clone()))
        .layer(axum::middleware::map_response(
            |mut resp: Response| async move {
                resp.headers_mut().insert(
                    axum::http::header::CACHE_CONTROL,
                    HeaderValue::from_static(cache::ADMIN),
                );
                resp
            },
        ))
        .with_state(app_state.clone());

    let origins: Vec<HeaderValue> = app_state
        .config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let methods: Vec<Method> = app_state
        .config
        .cors
        .methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = app_state
        .config
        .cors
        .headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();
    let mut cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(app_state.config.cors.credentials);
    if !methods.is_empty() {
        cors = cors.allow_methods(methods);
    }
    if !headers.is_empty() {
        cors = cors.allow_headers(headers);
    }

    let router = Router::new()
        .route("/health", get(status::health))
        .merge(admin_router)
        .fallback(proxy::proxy)
        .with_state(app_state.clone());

    router.layer((
        RequestIdLayer,
        AuditRecorderLayer::new(app_state.clone()),
        SecurityHeadersLayer,
        RateLimitLayer::new(app_state.clone()),
        RequestBodyLimitLayer::new(app_state.config.body_size.max_bytes as usize),
        cors,
        CompressionLayer::new()
            .zstd(true)
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
        TimeoutLayer::new(Duration::from_secs(60)),
    ))
}
