//! Issuance surface for the auth gate: exchanging the shared secret for a
//! session token pair, refreshing an access token, and managing opaque API
//! keys. None of this persists a session — the tokens are self-contained.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::audit::AuditEvent;
use crate::auth::token::TokenKind;
use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};
use crate::web::middleware::client_ip::{ClientIp, UserAgent};

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

/// `POST /auth/login` — exchanges the shared admin secret, sent as a JSON
/// body, for a session token pair.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    body: Option<Json<LoginBody>>,
) -> Result<Json<TokenPair>, ApiError> {
    let Some(Json(body)) = body else {
        return Err(ApiError::new(ApiErrorCode::InvalidRequest, "missing credentials"));
    };

    if body.username != state.admin_credential.username {
        return Err(ApiError::new(ApiErrorCode::Unauthorized, "invalid credentials"));
    }
    let ok = crate::auth::password::verify(&body.password, &state.admin_credential.password_hash)
        .map_err(|_| ApiError::new(ApiErrorCode::Unauthorized, "invalid credentials"))?;
    if !ok {
        return Err(ApiError::new(ApiErrorCode::Unauthorized, "invalid credentials"));
    }

    let now = state.clock.now_wall();
    let access_token = state.token_signer.issue(&body.username, TokenKind::Access, now);
    let refresh_token = state.token_signer.issue(&body.username, TokenKind::Refresh, now);

    state.audit.append(AuditEvent::AdminAction {
        ts: now,
        client_ip: Some(client_ip),
        actor: body.username.clone(),
        action: "login".to_string(),
        details: None,
        outcome: "ok".to_string(),
        user_agent,
    });

    Ok(Json(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer",
    }))
}

#[derive(Deserialize)]
pub struct RefreshBody {
    pub refresh_token: String,
}

/// `POST /auth/refresh` — trades a valid refresh token for a new access
/// token. There is no server-side session to invalidate the old refresh
/// token with; rotation happens by its own expiry.
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<TokenPair>, ApiError> {
    let now = state.clock.now_wall();
    let claims = state
        .token_signer
        .verify(&body.refresh_token, TokenKind::Refresh, now)
        .map_err(|_| ApiError::new(ApiErrorCode::Unauthorized, "invalid refresh token"))?;

    let access_token = state.token_signer.issue(&claims.sub, TokenKind::Access, now);
    let refresh_token = state.token_signer.issue(&claims.sub, TokenKind::Refresh, now);

    Ok(Json(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer",
    }))
}

#[derive(Serialize)]
pub struct ApiKeyInfo {
    pub id: i64,
    pub prefix: String,
    pub label: String,
    pub active: bool,
}

#[derive(Serialize)]
pub struct ApiKeyListResponse {
    pub keys: Vec<ApiKeyInfo>,
}

/// `GET /auth/keys`
#[instrument(skip_all)]
pub async fn list_keys(
    _user: crate::auth::AdminUser,
    State(state): State<AppState>,
) -> Result<Json<ApiKeyListResponse>, ApiError> {
    let rows = crate::auth::api_keys::list(&state.db_pool)
        .await
        .map_err(|e| crate::web::error::internal_error("list api keys", e))?;

    Ok(Json(ApiKeyListResponse {
        keys: rows
            .into_iter()
            .map(|r| ApiKeyInfo {
                id: r.id,
                prefix: r.prefix,
                label: r.label,
                active: r.active,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct CreateKeyBody {
    pub label: String,
}

#[derive(Serialize)]
pub struct CreateKeyResponse {
    pub full_key: String,
    pub prefix: String,
}

/// `POST /auth/keys` — the full key is shown exactly once, in this response.
#[instrument(skip_all)]
pub async fn create_key(
    user: crate::auth::AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    Json(body): Json<CreateKeyBody>,
) -> Result<Json<CreateKeyResponse>, ApiError> {
    let issued = crate::auth::api_keys::create(&state.db_pool, &body.label)
        .await
        .map_err(|e| crate::web::error::internal_error("create api key", e))?;

    state.audit.append(AuditEvent::AdminAction {
        ts: state.clock.now_wall(),
        client_ip: Some(client_ip),
        actor: format!("{:?}", user.0),
        action: "create_api_key".to_string(),
        details: Some(body.label),
        outcome: "ok".to_string(),
        user_agent,
    });

    Ok(Json(CreateKeyResponse {
        full_key: issued.full_key,
        prefix: issued.prefix,
    }))
}

/// `POST /auth/keys/{id}/revoke` — soft-disables the key (`active = 0`)
/// without removing its row from the audit trail's perspective.
#[instrument(skip_all)]
pub async fn revoke_key(
    user: crate::auth::AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    crate::auth::api_keys::revoke(&state.db_pool, id)
        .await
        .map_err(|e| crate::web::error::internal_error("revoke api key", e))?;

    state.audit.append(AuditEvent::AdminAction {
        ts: state.clock.now_wall(),
        client_ip: Some(client_ip),
        actor: format!("{:?}", user.0),
        action: "revoke_api_key".to_string(),
        details: Some(id.to_string()),
        outcome: "ok".to_string(),
        user_agent,
    });

    Ok(Json(serde_json::json!({ "revoked": true })))
}

/// `DELETE /auth/keys/{id}` — permanently removes the key row.
#[instrument(skip_all)]
pub async fn delete_key(
    user: crate::auth::AdminUser,
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    crate::auth::api_keys::delete(&state.db_pool, id)
        .await
        .map_err(|e| crate::web::error::internal_error("delete api key", e))?;

    state.audit.append(AuditEvent::AdminAction {
        ts: state.clock.now_wall(),
        client_ip: Some(client_ip),
        actor: format!("{:?}", user.0),
        action: "delete_api_key".to_string(),
        details: Some(id.to_string()),
        outcome: "ok".to_string(),
        user_agent,
    });

    Ok(Json(serde_json::json!({ "deleted": true })))
}
