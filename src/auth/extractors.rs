//! `AdminUser` accepts any one of the three credential kinds the control
//! plane recognizes: the shared admin secret (Basic), a session token
//! (Bearer), or a long-lived opaque key (`X-Api-Key`).

use axum::RequestPartsExt;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

use crate::auth::token::TokenKind;
use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};

#[derive(Debug, Clone)]
pub enum AdminPrincipal {
    SharedSecret,
    SessionToken,
    ApiKey { label: String },
}

#[derive(Debug, Clone)]
pub struct AdminUser(pub AdminPrincipal);

fn unauthorized() -> ApiError {
    ApiError::new(ApiErrorCode::Unauthorized, "authentication required")
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(api_key) = parts.headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
            let row = crate::auth::api_keys::verify(&state.db_pool, api_key)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "api key verification failed");
                    ApiError::new(ApiErrorCode::Internal, "internal error")
                })?;
            return match row {
                Some(row) => Ok(AdminUser(AdminPrincipal::ApiKey { label: row.label })),
                None => Err(unauthorized()),
            };
        }

        let TypedHeader(auth) = parts
            .extract::<TypedHeader<AuthorizationHeader>>()
            .await
            .map_err(|_| unauthorized())?;

        match auth {
            AuthorizationHeader::Basic(value) => {
                let decoded = BASE64_STANDARD
                    .decode(value.as_bytes())
                    .map_err(|_| unauthorized())?;
                let decoded = String::from_utf8(decoded).map_err(|_| unauthorized())?;
                let (username, password) = decoded.split_once(':').ok_or_else(unauthorized)?;

                if username != state.admin_credential.username {
                    return Err(unauthorized());
                }
                let ok = crate::auth::password::verify(password, &state.admin_credential.password_hash)
                    .map_err(|_| unauthorized())?;
                if !ok {
                    return Err(unauthorized());
                }
                Ok(AdminUser(AdminPrincipal::SharedSecret))
            }
            AuthorizationHeader::Bearer(token) => {
                let now = state.clock.now_wall();
                let claims = state
                    .token_signer
                    .verify(&token, TokenKind::Access, now)
                    .map_err(|_| unauthorized())?;
                if claims.sub != state.admin_credential.username {
                    return Err(unauthorized());
                }
                Ok(AdminUser(AdminPrincipal::SessionToken))
            }
        }
    }
}

/// A minimal stand-in for `axum-extra`'s typed header extraction, parsing
/// just the one header this gate needs.
struct TypedHeader<T>(T);

enum AuthorizationHeader {
    Basic(String),
    Bearer(String),
}

impl<S> FromRequestParts<S> for TypedHeader<AuthorizationHeader>
where
    S: Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if let Some(rest) = header.strip_prefix("Basic ") {
            Ok(TypedHeader(AuthorizationHeader::Basic(rest.to_string())))
        } else if let Some(rest) = header.strip_prefix("Bearer ") {
            Ok(TypedHeader(AuthorizationHeader::Bearer(rest.to_string())))
        } else {
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
