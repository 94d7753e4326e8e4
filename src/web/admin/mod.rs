//! Admin control plane: route table inspection, hot-reload, live policy
//! dump, and rate-limit operator actions. Every endpoint requires
//! `AdminUser` and every action is recorded to the audit store.

use std::net::IpAddr;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::audit::AuditEvent;
use crate::auth::AdminUser;
use crate::config::{AdminRateLimitSettings, BodySizeSettings, CorsSettings, ForwarderSettings, RateLimitSettings};
use crate::ratelimit::WindowStats;
use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};
use crate::web::middleware::client_ip::{ClientIp, UserAgent};

fn principal_label(user: &AdminUser) -> String {
    match &user.0 {
        crate::auth::extractors::AdminPrincipal::SharedSecret => "shared-secret".to_string(),
        crate::auth::extractors::AdminPrincipal::SessionToken => "session-token".to_string(),
        crate::auth::extractors::AdminPrincipal::ApiKey { label } => format!("api-key:{label}"),
    }
}

#[allow(clippy::too_many_arguments)]
fn record(
    state: &AppState,
    user: &AdminUser,
    client_ip: Option<IpAddr>,
    user_agent: Option<String>,
    action: &str,
    details: Option<String>,
    outcome: &str,
) {
    state.audit.append(AuditEvent::AdminAction {
        ts: state.clock.now_wall(),
        client_ip,
        actor: principal_label(user),
        action: action.to_string(),
        details,
        outcome: outcome.to_string(),
        user_agent,
    });
}

#[derive(Serialize)]
pub struct RouteInfo {
    pub prefix: String,
    pub upstream: String,
    pub strip_path: bool,
}

#[derive(Serialize)]
pub struct RoutesResponse {
    pub routes: Vec<RouteInfo>,
}

/// `GET /admin/routes` — the currently installed snapshot.
#[instrument(skip_all)]
pub async fn list_routes(
    user: AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
) -> Json<RoutesResponse> {
    let snapshot = state.routes.read().await.clone();
    let routes = snapshot
        .routes()
        .iter()
        .map(|r| RouteInfo {
            prefix: r.route.prefix.clone(),
            upstream: r.route.upstream.clone(),
            strip_path: r.route.strip_path,
        })
        .collect();
    record(&state, &user, Some(client_ip), user_agent, "list_routes", None, "ok");
    Json(RoutesResponse { routes })
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub git_commit: String,
    pub uptime_secs: u64,
    pub route_count: usize,
    pub audit_dropped: u64,
}

/// `GET /admin/status`
#[instrument(skip_all)]
pub async fn status(
    user: AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
) -> Json<StatusResponse> {
    let snapshot = state.routes.read().await.clone();
    record(&state, &user, Some(client_ip), user_agent, "status", None, "ok");
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_commit: env!("GIT_COMMIT_SHORT").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        route_count: snapshot.len(),
        audit_dropped: state.audit.dropped_count(),
    })
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub body_size: BodySizeSettings,
    pub rate_limit: RateLimitSettings,
    pub admin_rate_limit: AdminRateLimitSettings,
    pub forwarder: ForwarderSettings,
    pub cors: CorsSettings,
    pub trusted_proxy_hops: u8,
}

/// `GET /admin/config` — dumps the live policy currently in effect.
#[instrument(skip_all)]
pub async fn get_config(
    user: AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
) -> Json<ConfigResponse> {
    record(&state, &user, Some(client_ip), user_agent, "get_config", None, "ok");
    Json(ConfigResponse {
        body_size: state.config.body_size.clone(),
        rate_limit: state.config.rate_limit.clone(),
        admin_rate_limit: state.config.admin_rate_limit.clone(),
        forwarder: state.config.forwarder.clone(),
        cors: state.config.cors.clone(),
        trusted_proxy_hops: state.config.trusted_proxy_hops,
    })
}

/// `POST /admin/reload` — re-reads the configuration file from disk,
/// validates every route (including SSRF checks), and atomically swaps the
/// snapshot in. Serialized by `reload_guard` so concurrent reloads can't
/// interleave.
#[instrument(skip_all)]
pub async fn reload(
    user: AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
) -> Result<Json<RoutesResponse>, ApiError> {
    let _guard = state.reload_guard.lock().await;

    let config_path = std::env::var("GATEPROXY_CONFIG").unwrap_or_else(|_| "gateproxy.toml".to_string());
    let new_config = crate::config::Config::load(std::path::Path::new(&config_path)).map_err(|e| {
        tracing::error!(error = %e, "reload: failed to load configuration");
        ApiError::new(ApiErrorCode::Internal, "failed to load configuration")
    })?;

    let new_snapshot = crate::config::build_snapshot(&new_config).await.map_err(|e| {
        record(
            &state,
            &user,
            Some(client_ip),
            user_agent.clone(),
            "reload",
            Some(e.to_string()),
            "rejected",
        );
        ApiError::new(ApiErrorCode::Internal, "configuration validation failed")
    })?;

    let routes = new_snapshot
        .routes()
        .iter()
        .map(|r| RouteInfo {
            prefix: r.route.prefix.clone(),
            upstream: r.route.upstream.clone(),
            strip_path: r.route.strip_path,
        })
        .collect();

    *state.routes.write().await = std::sync::Arc::new(new_snapshot);

    info!("configuration reloaded");
    record(&state, &user, Some(client_ip), user_agent, "reload", None, "ok");

    Ok(Json(RoutesResponse { routes }))
}

#[derive(Serialize)]
pub struct RateLimitStatsResponse {
    pub ip: String,
    pub count: usize,
    pub oldest_age_secs: Option<u64>,
    pub blocked: bool,
}

fn stats_response(ip: IpAddr, stats: Option<WindowStats>) -> RateLimitStatsResponse {
    match stats {
        Some(s) => RateLimitStatsResponse {
            ip: ip.to_string(),
            count: s.count,
            oldest_age_secs: s.oldest_age.map(|d| d.as_secs()),
            blocked: s.blocked_until.is_some(),
        },
        None => RateLimitStatsResponse {
            ip: ip.to_string(),
            count: 0,
            oldest_age_secs: None,
            blocked: false,
        },
    }
}

/// `GET /admin/ratelimit/{ip}`
#[instrument(skip_all)]
pub async fn rate_limit_stats(
    user: AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    Path(ip): Path<String>,
) -> Result<Json<RateLimitStatsResponse>, ApiError> {
    let parsed: IpAddr = ip
        .parse()
        .map_err(|_| ApiError::new(ApiErrorCode::InvalidRequest, "invalid ip address"))?;
    let tier = state.config.data_plane_tier();
    let stats = state
        .data_limiter
        .stats(&parsed, Duration::from_secs(tier.window_secs));
    record(
        &state,
        &user,
        Some(client_ip),
        user_agent,
        "rate_limit_stats",
        Some(ip.clone()),
        "ok",
    );
    Ok(Json(stats_response(parsed, stats)))
}

/// `POST /admin/ratelimit/{ip}/clear`
#[instrument(skip_all)]
pub async fn rate_limit_clear(
    user: AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    Path(ip): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let parsed: IpAddr = ip
        .parse()
        .map_err(|_| ApiError::new(ApiErrorCode::InvalidRequest, "invalid ip address"))?;
    state.data_limiter.clear(&parsed);
    record(&state, &user, Some(client_ip), user_agent, "rate_limit_clear", Some(ip), "ok");
    Ok(Json(serde_json::json!({ "cleared": true })))
}

#[derive(Deserialize)]
pub struct BlockBody {
    pub duration_secs: u64,
}

/// `POST /admin/ratelimit/{ip}/block` — hard-stops an IP for `duration_secs`
/// regardless of its current request count.
#[instrument(skip_all)]
pub async fn rate_limit_block(
    user: AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    Path(ip): Path<String>,
    Json(body): Json<BlockBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let parsed: IpAddr = ip
        .parse()
        .map_err(|_| ApiError::new(ApiErrorCode::InvalidRequest, "invalid ip address"))?;
    state
        .data_limiter
        .block(parsed, Duration::from_secs(body.duration_secs));
    record(
        &state,
        &user,
        Some(client_ip),
        user_agent,
        "rate_limit_block",
        Some(format!("{ip} for {}s", body.duration_secs)),
        "ok",
    );
    Ok(Json(serde_json::json!({ "blocked": true })))
}
