//! Rate limiting for the admin/audit/auth control plane: keyed by
//! `(ip, operation)` so a slow drip against one admin endpoint doesn't
//! starve the operator's access to the others. On saturation the key enters
//! a blocked state for `block_seconds`, not just the remainder of the
//! sliding window, to throttle sustained brute force.

use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::warn;

use crate::ratelimit::Admission;
use crate::state::AppState;
use crate::web::middleware::client_ip::trusted_client_ip;
use crate::web::middleware::rate_limit::rate_limit_response;

#[derive(Clone)]
pub struct AdminRateLimitLayer {
    state: AppState,
}

impl AdminRateLimitLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for AdminRateLimitLayer {
    type Service = AdminRateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdminRateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AdminRateLimitService<S> {
    inner: S,
    state: AppState,
}

impl<S, ResBody> Service<Request> for AdminRateLimitService<S>
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
        let operation = req.uri().path().to_string();
        let ip = trusted_client_ip(
            req.headers(),
            req.extensions(),
            self.state.config.trusted_proxy_hops,
        );

        let Some(ip) = ip else {
            let future = self.inner.call(req);
            return Box::pin(future);
        };

        let tier = &self.state.config.admin_rate_limit;
        match self.state.admin_limiter.admit_with_block(
            (ip, operation.clone()),
            Duration::from_secs(tier.window_seconds),
            tier.attempts_per_window,
            Duration::from_secs(tier.block_seconds),
        ) {
            Admission::Allowed => {
                let future = self.inner.call(req);
                Box::pin(future)
            }
            Admission::Denied { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                warn!(client_ip = %ip, operation = %operation, retry_after_secs = secs, "admin rate limit exceeded");
                let resp = rate_limit_response(secs).map(Into::into);
                Box::pin(async move { Ok(resp) })
            }
        }
    }
}
