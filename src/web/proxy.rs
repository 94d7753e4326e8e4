//! Data-plane fallback handler: matches the request path against the
//! installed route table and forwards it, or returns 404 if nothing claims
//! it.

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::forwarder::forward_target;
use crate::routing::forwarded_path;
use crate::state::AppState;
use crate::web::middleware::client_ip::ClientIp;

pub async fn proxy(State(state): State<AppState>, ClientIp(client_ip): ClientIp, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let method = req.method().clone();
    let headers = req.headers().clone();
    let request_scheme = if state.config.listen_port_https.is_some() {
        "https"
    } else {
        "http"
    };
    let request_host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&state.config.listen_addr)
        .to_string();

    let snapshot = state.routes.read().await.clone();
    let Some(resolved) = snapshot.matches(&path) else {
        return (StatusCode::NOT_FOUND, "no route matches this path").into_response();
    };

    let route = resolved.route.clone();
    let upstream = route.upstream.clone();
    let body = req.into_body();

    let target_path = forwarded_path(&route, &path);
    let target = forward_target(&target_path, query.as_deref());

    match state
        .forwarder
        .forward(
            &upstream,
            &target,
            method,
            headers,
            body,
            client_ip,
            request_scheme,
            &request_host,
        )
        .await
    {
        Ok((status, headers, body)) => (status, headers, body).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, upstream = %upstream, "forward failed");
            (e.status(), "upstream request failed").into_response()
        }
    }
}
