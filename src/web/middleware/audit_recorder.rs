//! Records one `AuditEvent::Request` per proxied request: timing, status,
//! matched route prefix, and the attributed client IP. Also stamps the
//! response with `X-Process-Time-Ms`, the same duration the event records.

use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;
use tower::{Layer, Service};

use crate::audit::AuditEvent;
use crate::state::AppState;
use crate::web::middleware::client_ip::{header_str, trusted_client_ip};

#[derive(Clone)]
pub struct AuditRecorderLayer {
    state: AppState,
}

impl AuditRecorderLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for AuditRecorderLayer {
    type Service = AuditRecorderService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditRecorderService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuditRecorderService<S> {
    inner: S,
    state: AppState,
}

impl<S, ResBody> Service<Request> for AuditRecorderService<S>
where
    S: Service<Request, Response = Response<ResBody>> + Send + Clone + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Debug + Send,
    ResBody: Send + 'static,
    Body: Into<ResBody>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let state = self.state.clone();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let client_ip = trusted_client_ip(req.headers(), req.extensions(), state.config.trusted_proxy_hops);
        let user_agent = header_str(req.headers(), "user-agent").map(str::to_string);
        let start = Instant::now();

        let future = self.inner.call(req);

        Box::pin(async move {
            let result = future.await;
            match result {
                Ok(mut response) => {
                    let duration_ms = start.elapsed().as_millis() as i64;
                    if let Some(ip) = client_ip {
                        let route_prefix = {
                            if let Ok(snapshot) = state.routes.try_read() {
                                snapshot.matches(&path).map(|r| r.route.prefix.clone())
                            } else {
                                None
                            }
                        };
                        state.audit.append(AuditEvent::Request {
                            ts: state.clock.now_wall(),
                            client_ip: ip,
                            method,
                            path,
                            route_prefix,
                            status: response.status().as_u16(),
                            duration_ms,
                            user_agent: user_agent.clone(),
                        });
                    }
                    if let Ok(v) = HeaderValue::from_str(&duration_ms.to_string()) {
                        response.headers_mut().insert("x-process-time-ms", v);
                    }
                    Ok(response)
                }
                Err(e) => Err(e),
            }
        })
    }
}
