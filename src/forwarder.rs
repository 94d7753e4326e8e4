//! Forwards a request to a route's upstream and relays the response back,
//! stripping hop-by-hop headers and attributing the client in both
//! directions. Bodies are buffered rather than streamed, bounded by the
//! body-size guard in front of this component.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::ForwarderSettings;

/// Headers that are connection-scoped and must never be forwarded in either
/// direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream connection failed")]
    ConnectFailed,
    #[error("upstream request timed out")]
    TimedOut,
    #[error("upstream returned an invalid response")]
    BadUpstreamResponse,
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::ConnectFailed => StatusCode::BAD_GATEWAY,
            ForwardError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::BadUpstreamResponse => StatusCode::BAD_GATEWAY,
        }
    }
}

pub struct Forwarder {
    client: Client,
    host_semaphores: dashmap::DashMap<String, Arc<Semaphore>>,
    max_concurrent_per_host: usize,
}

impl Forwarder {
    pub fn new(settings: &ForwarderSettings) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_seconds))
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .build()
            .expect("reqwest client configuration is always valid");

        Self {
            client,
            host_semaphores: dashmap::DashMap::new(),
            max_concurrent_per_host: settings.max_concurrent_per_host,
        }
    }

    fn semaphore_for(&self, host: &str) -> Arc<Semaphore> {
        self.host_semaphores
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_concurrent_per_host)))
            .clone()
    }

    /// Forwards one request to `upstream_url` and returns the upstream's
    /// response, ready to be relayed to the original client.
    #[allow(clippy::too_many_arguments)]
    pub async fn forward(
        &self,
        upstream_base: &str,
        forwarded_path_and_query: &str,
        method: Method,
        mut headers: HeaderMap,
        body: Body,
        client_ip: std::net::IpAddr,
        request_scheme: &str,
        request_host: &str,
    ) -> Result<(StatusCode, HeaderMap, Body), ForwardError> {
        let url = format!(
            "{}{}",
            upstream_base.trim_end_matches('/'),
            forwarded_path_and_query
        );

        let host = reqwest::Url::parse(upstream_base)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default();

        let permit = self.semaphore_for(&host).acquire_owned().await;
        let Ok(_permit) = permit else {
            return Err(ForwardError::ConnectFailed);
        };

        strip_hop_by_hop(&mut headers);
        inject_forwarded_headers(&mut headers, client_ip, request_scheme, request_host);

        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|_| ForwardError::BadUpstreamResponse)?;

        let mut request = self
            .client
            .request(method, &url)
            .body(body_bytes.to_vec());

        for (name, value) in headers.iter() {
            request = request.header(name.as_str(), value.as_bytes());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::TimedOut
            } else {
                ForwardError::ConnectFailed
            }
        })?;

        let status = response.status();
        let mut response_headers = HeaderMap::new();
        for (name, value) in response.headers().iter() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            if let (Ok(n), v) = (HeaderName::from_bytes(name.as_str().as_bytes()), value) {
                response_headers.insert(n, v.clone());
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|_| ForwardError::BadUpstreamResponse)?;

        Ok((
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            response_headers,
            Body::from(bytes),
        ))
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Strips any inbound `X-Forwarded-*`/`X-Real-IP` a client might have sent
/// and replaces them with values attributing the request we actually
/// received, so upstreams never see client-spoofed forwarding headers.
fn inject_forwarded_headers(
    headers: &mut HeaderMap,
    client_ip: std::net::IpAddr,
    request_scheme: &str,
    request_host: &str,
) {
    for name in [
        "x-forwarded-for",
        "x-forwarded-proto",
        "x-forwarded-host",
        "x-real-ip",
    ] {
        headers.remove(name);
    }

    if let Ok(v) = HeaderValue::from_str(&client_ip.to_string()) {
        headers.insert("x-forwarded-for", v.clone());
        headers.insert("x-real-ip", v);
    }
    if let Ok(v) = HeaderValue::from_str(request_scheme) {
        headers.insert("x-forwarded-proto", v);
    }
    if let Ok(v) = HeaderValue::from_str(request_host) {
        headers.insert("x-forwarded-host", v);
    }
}

/// Builds the request-target string (`<path>?<query>`) to send upstream.
pub fn forward_target(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("x-custom", HeaderValue::from_static("value"));
        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key("connection"));
        assert!(headers.contains_key("x-custom"));
    }

    #[test]
    fn injects_forwarded_headers() {
        let mut headers = HeaderMap::new();
        let ip: std::net::IpAddr = "203.0.113.7".parse().unwrap();
        inject_forwarded_headers(&mut headers, ip, "https", "gateway.example");
        assert_eq!(headers.get("x-real-ip").unwrap(), "203.0.113.7");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.7");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "gateway.example");
    }

    #[test]
    fn strips_inbound_forwarded_headers_before_injecting() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("attacker.example"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        let ip: std::net::IpAddr = "203.0.113.7".parse().unwrap();
        inject_forwarded_headers(&mut headers, ip, "http", "gateway.example");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.7");
        assert_eq!(headers.get("x-real-ip").unwrap(), "203.0.113.7");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "gateway.example");
    }

    #[test]
    fn forward_target_includes_query_when_present() {
        assert_eq!(forward_target("/api/x", Some("a=1")), "/api/x?a=1");
        assert_eq!(forward_target("/api/x", None), "/api/x");
    }
}
