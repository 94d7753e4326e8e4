//! Long-lived opaque API keys: a random secret identified by a short,
//! non-secret prefix so lookup never requires comparing against every hash
//! on file.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use sqlx::SqlitePool;
use thiserror::Error;

use super::password;

const PREFIX_LEN: usize = 10;
const SECRET_BYTES: usize = 32;
const KEY_PREFIX_TAG: &str = "gwk";

#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// The full secret, shown to the caller exactly once.
    pub full_key: String,
    pub prefix: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyRow {
    pub id: i64,
    pub prefix: String,
    pub key_hash: String,
    pub label: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum ApiKeyError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Hash(#[from] password::PasswordError),
}

/// Generates a new key of the form `gwk_<prefix>_<secret>`. The prefix is
/// stored in plaintext for lookup; only the argon2 hash of the full key is
/// persisted.
pub fn generate(label: &str) -> (IssuedKey, String, String) {
    let mut prefix_bytes = [0u8; PREFIX_LEN];
    OsRng.fill_bytes(&mut prefix_bytes);
    let prefix = format!("{KEY_PREFIX_TAG}_{}", hex_encode(&prefix_bytes));

    let mut secret_bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut secret_bytes);
    let secret = hex_encode(&secret_bytes);

    let full_key = format!("{prefix}_{secret}");
    (
        IssuedKey {
            full_key: full_key.clone(),
            prefix: prefix.clone(),
        },
        prefix,
        label.to_string(),
    )
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Extracts the lookup prefix from a presented key without touching the
/// database; returns `None` if the key doesn't even look like ours.
pub fn extract_prefix(presented: &str) -> Option<&str> {
    let mut parts = presented.splitn(3, '_');
    let tag = parts.next()?;
    let prefix_hex = parts.next()?;
    if tag != KEY_PREFIX_TAG {
        return None;
    }
    let end = tag.len() + 1 + prefix_hex.len();
    Some(&presented[..end])
}

pub async fn create(pool: &SqlitePool, label: &str) -> Result<IssuedKey, ApiKeyError> {
    let (issued, prefix, label) = generate(label);
    let hash = password::hash(&issued.full_key)?;
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO api_keys (prefix, key_hash, label, active, created_at) VALUES (?, ?, ?, 1, ?)",
    )
    .bind(&prefix)
    .bind(&hash)
    .bind(&label)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(issued)
}

pub async fn verify(pool: &SqlitePool, presented: &str) -> Result<Option<ApiKeyRow>, ApiKeyError> {
    let Some(prefix) = extract_prefix(presented) else {
        return Ok(None);
    };

    let row = sqlx::query_as::<_, ApiKeyRow>(
        "SELECT id, prefix, key_hash, label, active, created_at, last_used_at FROM api_keys WHERE prefix = ?",
    )
    .bind(prefix)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };
    if !row.active {
        return Ok(None);
    }
    if !password::verify(presented, &row.key_hash)? {
        return Ok(None);
    }

    sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(row.id)
        .execute(pool)
        .await?;

    Ok(Some(row))
}

pub async fn revoke(pool: &SqlitePool, id: i64) -> Result<(), ApiKeyError> {
    sqlx::query("UPDATE api_keys SET active = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<(), ApiKeyError> {
    sqlx::query("DELETE FROM api_keys WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<ApiKeyRow>, ApiKeyError> {
    let rows = sqlx::query_as::<_, ApiKeyRow>(
        "SELECT id, prefix, key_hash, label, active, created_at, last_used_at FROM api_keys ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_prefix_from_a_well_formed_key() {
        let (issued, ..) = generate("ci");
        let prefix = extract_prefix(&issued.full_key).unwrap();
        assert_eq!(prefix, issued.prefix);
    }

    #[test]
    fn rejects_keys_without_the_tag() {
        assert!(extract_prefix("not-one-of-ours").is_none());
    }

    #[sqlx::test]
    async fn create_then_verify_round_trips(pool: SqlitePool) {
        sqlx::query(
            "CREATE TABLE api_keys (id INTEGER PRIMARY KEY, prefix TEXT NOT NULL UNIQUE, key_hash TEXT NOT NULL, label TEXT NOT NULL, active INTEGER NOT NULL, created_at TEXT NOT NULL, last_used_at TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let issued = create(&pool, "ci-runner").await.unwrap();
        let verified = verify(&pool, &issued.full_key).await.unwrap();
        assert!(verified.is_some());
        assert_eq!(verified.unwrap().label, "ci-runner");

        let wrong = verify(&pool, "gwk_deadbeef_wrongsecret").await.unwrap();
        assert!(wrong.is_none());
    }

    #[sqlx::test]
    async fn revoked_key_no_longer_verifies(pool: SqlitePool) {
        sqlx::query(
            "CREATE TABLE api_keys (id INTEGER PRIMARY KEY, prefix TEXT NOT NULL UNIQUE, key_hash TEXT NOT NULL, label TEXT NOT NULL, active INTEGER NOT NULL, created_at TEXT NOT NULL, last_used_at TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let issued = create(&pool, "ci-runner").await.unwrap();
        let row = verify(&pool, &issued.full_key).await.unwrap().unwrap();
        revoke(&pool, row.id).await.unwrap();
        assert!(verify(&pool, &issued.full_key).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn deleted_key_is_gone_from_the_list(pool: SqlitePool) {
        sqlx::query(
            "CREATE TABLE api_keys (id INTEGER PRIMARY KEY, prefix TEXT NOT NULL UNIQUE, key_hash TEXT NOT NULL, label TEXT NOT NULL, active INTEGER NOT NULL, created_at TEXT NOT NULL, last_used_at TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let issued = create(&pool, "ci-runner").await.unwrap();
        let row = verify(&pool, &issued.full_key).await.unwrap().unwrap();
        delete(&pool, row.id).await.unwrap();
        assert!(list(&pool).await.unwrap().is_empty());
    }
}
