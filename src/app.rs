//! Application assembly: loads configuration and credentials, builds every
//! shared component, and runs the HTTP listener to completion.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::audit::AuditStore;
use crate::auth::TokenSigner;
use crate::clock::SystemClock;
use crate::config::{Config, Credentials, build_snapshot};
use crate::forwarder::Forwarder;
use crate::ratelimit::{AdminLimiter, DataPlaneLimiter};
use crate::routing;
use crate::state::{AdminCredential, AppState};
use crate::web;

pub struct App {
    state: AppState,
}

impl App {
    pub async fn new(config_path: &Path) -> Result<Self, anyhow::Error> {
        let config = Config::load(config_path).context("failed to load configuration")?;
        let credentials = Credentials::from_env().context("failed to load credentials")?;

        if config.listen_port_https.is_some() && (credentials.tls_cert.is_none() || credentials.tls_key.is_none()) {
            return Err(crate::config::ConfigError::MissingTls.into());
        }

        let snapshot = build_snapshot(&config).await.context("route validation failed")?;
        info!(route_count = snapshot.len(), "routes validated");

        let audit = AuditStore::connect(&credentials.audit_path)
            .await
            .context("failed to open audit store")?;
        let db_pool = audit.pool().clone();

        let password_hash =
            crate::auth::password::hash(&credentials.admin_password).context("failed to hash admin password")?;

        let clock = Arc::new(SystemClock);

        let state = AppState {
            config: Arc::new(config.clone()),
            routes: routing::new_shared(snapshot),
            reload_guard: Arc::new(tokio::sync::Mutex::new(())),
            data_limiter: Arc::new(DataPlaneLimiter::new(clock.clone())),
            admin_limiter: Arc::new(AdminLimiter::new(clock.clone())),
            forwarder: Arc::new(Forwarder::new(&config.forwarder)),
            audit: Arc::new(audit),
            db_pool,
            token_signer: Arc::new(TokenSigner::new(credentials.token_signing_key)),
            admin_credential: Arc::new(AdminCredential {
                username: credentials.admin_username,
                password_hash,
            }),
            clock,
            started_at: Instant::now(),
        };

        Ok(Self { state })
    }

    /// Runs the HTTP listener until a shutdown signal arrives, draining
    /// in-flight requests for up to `shutdown_timeout_secs`.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let shutdown_timeout = std::time::Duration::from_secs(self.state.config.shutdown_timeout_secs);
        let addr = format!("{}:{}", self.state.config.listen_addr, self.state.config.listen_port_http);
        let listener = TcpListener::bind(&addr).await.context("failed to bind listener")?;
        info!(addr = %addr, "listening");

        let router = web::create_router(self.state)
            .into_make_service_with_connect_info::<std::net::SocketAddr>();

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
            .await
            .context("server error")?;

        Ok(())
    }
}

async fn shutdown_signal(timeout: std::time::Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(timeout_secs = timeout.as_secs(), "shutdown signal received, draining");
}
