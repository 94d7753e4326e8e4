//! Shared, cheaply-cloneable application state threaded through every
//! handler and middleware layer.

use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;

use crate::audit::AuditStore;
use crate::auth::TokenSigner;
use crate::clock::Clock;
use crate::config::Config;
use crate::forwarder::Forwarder;
use crate::ratelimit::{AdminLimiter, DataPlaneLimiter};
use crate::routing::SharedSnapshot;

pub struct AdminCredential {
    pub username: String,
    pub password_hash: String,
}

/// Everything a request handler might need, held behind `Arc` so `AppState`
/// itself stays `Clone` at the cost of one atomic bump per clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub routes: SharedSnapshot,
    pub reload_guard: Arc<tokio::sync::Mutex<()>>,
    pub data_limiter: Arc<DataPlaneLimiter>,
    pub admin_limiter: Arc<AdminLimiter>,
    pub forwarder: Arc<Forwarder>,
    pub audit: Arc<AuditStore>,
    pub db_pool: SqlitePool,
    pub token_signer: Arc<TokenSigner>,
    pub admin_credential: Arc<AdminCredential>,
    pub clock: Arc<dyn Clock>,
    pub started_at: Instant,
}
