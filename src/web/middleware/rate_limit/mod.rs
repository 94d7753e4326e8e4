//! Data-plane rate limiting: one sliding window per client IP against the
//! single configured `requests_per_minute` budget. Keyed off the socket peer
//! unless `trusted_proxy_hops` opts into trusting a cooperating proxy's
//! `X-Forwarded-For`.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use tower::{Layer, Service};
use tracing::warn;

use crate::ratelimit::Admission;
use crate::state::AppState;
use crate::web::middleware::client_ip::trusted_client_ip;

#[derive(Clone)]
pub struct RateLimitLayer {
    state: AppState,
}

impl RateLimitLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: AppState,
}

impl<S, ResBody> Service<Request> for RateLimitService<S>
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
        let client_ip = trusted_client_ip(
            req.headers(),
            req.extensions(),
            self.state.config.trusted_proxy_hops,
        );
        let path = req.uri().path().to_string();

        let Some(ip) = client_ip else {
            let future = self.inner.call(req);
            return Box::pin(future);
        };

        let tier = self.state.config.data_plane_tier();

        match self.state.data_limiter.admit(
            ip,
            std::time::Duration::from_secs(tier.window_secs),
            tier.max_requests,
        ) {
            Admission::Allowed => {
                let future = self.inner.call(req);
                Box::pin(future)
            }
            Admission::Denied { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                warn!(client_ip = %ip, path = %path, retry_after_secs = secs, "rate limit exceeded");
                let resp = rate_limit_response(secs).map(Into::into);
                Box::pin(async move { Ok(resp) })
            }
        }
    }
}

pub fn rate_limit_response(retry_after: u64) -> Response<Body> {
    let body = format!(
        r#"{{"code":"RATE_LIMITED","message":"Too many requests. Retry after {retry_after} seconds."}}"#,
    );
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    response.headers_mut().insert(
        "retry-after",
        HeaderValue::from_str(&retry_after.to_string()).unwrap(),
    );
    response
}
