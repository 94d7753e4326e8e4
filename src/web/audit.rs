//! Audit query plane: filtered/paginated reads and aggregate stats over the
//! recorded trail. Read-only, still gated by `AdminUser`.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use tracing::instrument;

use crate::audit::AuditLogFilter;
use crate::auth::AdminUser;
use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode, internal_error};

fn default_limit() -> i64 {
    200
}

#[derive(Deserialize)]
pub struct AuditLogParams {
    pub client_ip: Option<String>,
    pub route_prefix: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// `GET /audit/logs`
#[instrument(skip_all)]
pub async fn logs(
    _user: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<AuditLogParams>,
) -> Result<Json<crate::audit::AuditLogPage>, ApiError> {
    let page = state
        .audit
        .list(AuditLogFilter {
            client_ip: params.client_ip,
            route_prefix: params.route_prefix,
            since: None,
            limit: params.limit,
            offset: params.offset,
        })
        .await
        .map_err(|e| internal_error("list audit log", e))?;

    Ok(Json(page))
}

#[derive(Deserialize)]
pub struct AuditStatsParams {
    #[serde(default)]
    pub range: Option<String>,
}

/// `GET /audit/stats`
#[instrument(skip_all)]
pub async fn stats(
    _user: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<AuditStatsParams>,
) -> Result<Json<crate::audit::AuditStats>, ApiError> {
    let range = params.range.as_deref().unwrap_or("24h");
    let duration = match range {
        "1h" => chrono::Duration::hours(1),
        "6h" => chrono::Duration::hours(6),
        "24h" => chrono::Duration::hours(24),
        "7d" => chrono::Duration::days(7),
        "30d" => chrono::Duration::days(30),
        _ => {
            return Err(ApiError::new(
                ApiErrorCode::InvalidRange,
                format!("invalid range '{range}'. valid: 1h, 6h, 24h, 7d, 30d"),
            ));
        }
    };
    let since = chrono::Utc::now() - duration;

    let result = state
        .audit
        .stats(since)
        .await
        .map_err(|e| internal_error("audit stats", e))?;

    Ok(Json(result))
}
