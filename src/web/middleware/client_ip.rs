//! On-demand client IP extraction.
//!
//! The attributed IP is the socket peer, unless `trusted_proxy_hops` is
//! configured non-zero, in which case the `X-Forwarded-For` entry that many
//! hops deep (counted from the right) is trusted instead. With the default
//! of zero hops a client can never spoof its attributed IP by sending its
//! own `X-Forwarded-For`.
//!
//! ```ignore
//! async fn handler(ClientIp(ip): ClientIp, ...) -> impl IntoResponse { ... }
//! ```

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::StatusCode;
use http::request::Parts;
use std::net::{IpAddr, SocketAddr};

use crate::state::AppState;

/// The resolved client IP address.
pub struct ClientIp(pub IpAddr);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match trusted_client_ip(&parts.headers, &parts.extensions, state.config.trusted_proxy_hops) {
            Some(ip) => Ok(ClientIp(ip)),
            None => Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to determine client IP",
            )),
        }
    }
}

/// The inbound `User-Agent` header, if any. Never rejects.
pub struct UserAgent(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for UserAgent {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(UserAgent(header_str(&parts.headers, "user-agent").map(str::to_string)))
    }
}

/// Resolves the address to attribute a request to. `trusted_hops = 0` trusts
/// nothing the client sent and keys purely off the socket peer; `n > 0`
/// trusts the `n`-th `X-Forwarded-For` entry counted from the right (the
/// hop closest to this server), falling back to the socket peer if the
/// header is absent or too short.
pub(crate) fn trusted_client_ip(
    headers: &http::HeaderMap,
    extensions: &http::Extensions,
    trusted_hops: u8,
) -> Option<IpAddr> {
    if trusted_hops > 0
        && let Some(xff) = header_str(headers, "x-forwarded-for")
    {
        let parts: Vec<&str> = xff.split(',').map(str::trim).collect();
        if let Some(idx) = parts.len().checked_sub(trusted_hops as usize)
            && let Some(ip) = parts.get(idx).and_then(|s| s.parse().ok())
        {
            return Some(ip);
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

pub(crate) fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
