//! Durable audit trail: every proxied request and every admin action is
//! appended to a single embedded SQLite database by one dedicated writer
//! task, so appends never contend with each other and a crash mid-write
//! can't corrupt concurrent writers.

mod query;

pub use query::{AuditLogFilter, AuditLogPage, AuditStats};

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum AuditEvent {
    Request {
        ts: DateTime<Utc>,
        client_ip: IpAddr,
        method: String,
        path: String,
        route_prefix: Option<String>,
        status: u16,
        duration_ms: i64,
        user_agent: Option<String>,
    },
    AdminAction {
        ts: DateTime<Utc>,
        client_ip: Option<IpAddr>,
        actor: String,
        action: String,
        details: Option<String>,
        outcome: String,
        user_agent: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Handle to the writer task plus the pool read queries run against.
pub struct AuditStore {
    pool: SqlitePool,
    sender: mpsc::Sender<AuditEvent>,
    dropped: std::sync::atomic::AtomicU64,
}

const QUEUE_CAPACITY: usize = 10_000;
const BATCH_MAX: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

impl AuditStore {
    pub async fn connect(path: &str) -> Result<Self, AuditError> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(run_writer(pool.clone(), receiver));

        Ok(Self {
            pool,
            sender,
            dropped: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Never blocks the caller. Under sustained backpressure the event is
    /// dropped and counted rather than stalling the request path.
    pub fn append(&self, event: AuditEvent) {
        if self.sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!("audit queue full, dropping event");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn list(&self, filter: AuditLogFilter) -> Result<AuditLogPage, AuditError> {
        query::list(&self.pool, filter).await
    }

    pub async fn stats(&self, since: DateTime<Utc>) -> Result<AuditStats, AuditError> {
        query::stats(&self.pool, since).await
    }
}

async fn run_writer(pool: SqlitePool, mut receiver: mpsc::Receiver<AuditEvent>) {
    let mut batch = Vec::with_capacity(BATCH_MAX);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            received = receiver.recv() => {
                match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= BATCH_MAX {
                            flush(&pool, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&pool, &mut batch).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&pool, &mut batch).await;
            }
        }
    }
}

async fn flush(pool: &SqlitePool, batch: &mut Vec<AuditEvent>) {
    if batch.is_empty() {
        return;
    }
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!(error = %e, "failed to open audit transaction");
            return;
        }
    };

    for event in batch.drain(..) {
        let result = match event {
            AuditEvent::Request {
                ts,
                client_ip,
                method,
                path,
                route_prefix,
                status,
                duration_ms,
                user_agent,
            } => {
                sqlx::query(
                    "INSERT INTO audit_events (ts, kind, client_ip, method, path, route_prefix, status, duration_ms, actor, action, details, outcome, user_agent) \
                     VALUES (?, 'request', ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, ?)",
                )
                .bind(ts)
                .bind(client_ip.to_string())
                .bind(method)
                .bind(path)
                .bind(route_prefix)
                .bind(status as i64)
                .bind(duration_ms)
                .bind(user_agent)
                .execute(&mut *tx)
                .await
            }
            AuditEvent::AdminAction {
                ts,
                client_ip,
                actor,
                action,
                details,
                outcome,
                user_agent,
            } => {
                sqlx::query(
                    "INSERT INTO audit_events (ts, kind, client_ip, method, path, route_prefix, status, duration_ms, actor, action, details, outcome, user_agent) \
                     VALUES (?, 'admin_action', ?, NULL, NULL, NULL, NULL, NULL, ?, ?, ?, ?, ?)",
                )
                .bind(ts)
                .bind(client_ip.map(|ip| ip.to_string()))
                .bind(actor)
                .bind(action)
                .bind(details)
                .bind(outcome)
                .bind(user_agent)
                .execute(&mut *tx)
                .await
            }
        };

        if let Err(e) = result {
            tracing::error!(error = %e, "failed to insert audit event");
        }
    }

    if let Err(e) = tx.commit().await {
        tracing::error!(error = %e, "failed to commit audit batch");
    }
}
