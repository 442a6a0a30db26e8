use super::retry::{RetryPolicy, retry_with_policy};
use crate::error::StoreError;
use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;

const MIN_CONNECTIONS: u32 = 1;
const MAX_CONNECTIONS: u32 = 10;

const STORE_SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS store_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
const STORE_SCHEMA_VERSION_KEY: &str = "store_schema_version";
const STORE_SCHEMA_VERSION: u32 = 1;

/// Key/value persistence for per-chat state blobs.
///
/// Values are opaque bytes; key layout is owned by the callers (the chat
/// cache uses `chat_data_<chat_id>`). Connections come from a bounded pool;
/// an operation waits for a free connection rather than failing fast.
/// Transient connection failures are retried with linear backoff, and the
/// broken connection is discarded so the next attempt draws a fresh one.
pub struct DurableStore {
    pool: SqlitePool,
    policy: RetryPolicy,
}

/// Connection-class failures expected to resolve on retry, as opposed to
/// request-level errors (malformed query, constraint, decode).
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

async fn ensure_store_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query(STORE_SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create store_schema_meta table")?;

    let stored_version: Option<(String,)> =
        sqlx::query_as("SELECT value FROM store_schema_meta WHERE key = $1")
            .bind(STORE_SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await
            .context("load store schema version")?;

    if let Some((value,)) = stored_version {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid store schema version value: {value}"))?;
        anyhow::ensure!(
            parsed == STORE_SCHEMA_VERSION,
            "incompatible store schema version: stored={parsed}, expected={STORE_SCHEMA_VERSION}. \
remove the chat record DB and restart."
        );
        return Ok(());
    }

    sqlx::query("INSERT INTO store_schema_meta (key, value) VALUES ($1, $2)")
        .bind(STORE_SCHEMA_VERSION_KEY)
        .bind(STORE_SCHEMA_VERSION.to_string())
        .execute(pool)
        .await
        .context("persist store schema version")?;

    Ok(())
}

impl DurableStore {
    /// Create a store over an existing pool and run idempotent schema setup.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        Self::with_policy(pool, RetryPolicy::default()).await
    }

    pub async fn with_policy(pool: SqlitePool, policy: RetryPolicy) -> Result<Self> {
        ensure_store_schema_version(&pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_records (
                 key  TEXT PRIMARY KEY,
                 data BLOB NOT NULL
             )",
        )
        .execute(&pool)
        .await
        .context("create chat_records table")?;

        Ok(Self { pool, policy })
    }

    /// Open (creating if missing) the database at `path` with the bounded
    /// production pool.
    pub async fn connect(path: &Path) -> Result<Self> {
        Self::connect_with(path, RetryPolicy::default()).await
    }

    pub async fn connect_with(path: &Path, policy: RetryPolicy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(MIN_CONNECTIONS)
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .context("open chat record store")?;

        Self::with_policy(pool, policy).await
    }

    pub async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, StoreError> {
        let pool = &self.pool;
        retry_with_policy(self.policy, is_transient, move |_attempt| {
            let pool = pool;
            let key = key;
            async move {
                let mut conn = pool.acquire().await?;
                let result = sqlx::query("SELECT data FROM chat_records WHERE key = $1")
                    .bind(key)
                    .fetch_optional(conn.as_mut())
                    .await;
                match result {
                    Ok(row) => match row {
                        Some(row) => Ok(Some(row.try_get::<Vec<u8>, _>("data")?)),
                        None => Ok(None),
                    },
                    Err(err) => {
                        if is_transient(&err) {
                            drop(conn.detach());
                        }
                        Err(err)
                    }
                }
            }
        })
        .await
        .map_err(|err| self.map_error(err))
    }

    pub async fn set(&self, key: &str, data: &[u8]) -> std::result::Result<(), StoreError> {
        let pool = &self.pool;
        retry_with_policy(self.policy, is_transient, move |_attempt| {
            let pool = pool;
            let key = key;
            let data = data;
            async move {
                let mut conn = pool.acquire().await?;
                let result = sqlx::query(
                    "INSERT INTO chat_records (key, data) VALUES ($1, $2)
                     ON CONFLICT(key) DO UPDATE SET data = excluded.data",
                )
                .bind(key)
                .bind(data)
                .execute(conn.as_mut())
                .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        if is_transient(&err) {
                            drop(conn.detach());
                        }
                        Err(err)
                    }
                }
            }
        })
        .await
        .map_err(|err| self.map_error(err))
    }

    /// Returns whether a record existed under `key`.
    pub async fn delete(&self, key: &str) -> std::result::Result<bool, StoreError> {
        let pool = &self.pool;
        retry_with_policy(self.policy, is_transient, move |_attempt| {
            let pool = pool;
            let key = key;
            async move {
                let mut conn = pool.acquire().await?;
                let result = sqlx::query("DELETE FROM chat_records WHERE key = $1")
                    .bind(key)
                    .execute(conn.as_mut())
                    .await;
                match result {
                    Ok(done) => Ok(done.rows_affected() > 0),
                    Err(err) => {
                        if is_transient(&err) {
                            drop(conn.detach());
                        }
                        Err(err)
                    }
                }
            }
        })
        .await
        .map_err(|err| self.map_error(err))
    }

    pub async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<(String, Vec<u8>)>, StoreError> {
        let pattern = like_prefix(prefix);
        let pool = &self.pool;
        retry_with_policy(self.policy, is_transient, move |_attempt| {
            let pool = pool;
            let pattern = pattern.clone();
            async move {
                let mut conn = pool.acquire().await?;
                let result = sqlx::query(
                    "SELECT key, data FROM chat_records
                     WHERE key LIKE $1 ESCAPE '\\'
                     ORDER BY key",
                )
                .bind(&pattern)
                .fetch_all(conn.as_mut())
                .await;
                match result {
                    Ok(rows) => {
                        let mut records = Vec::with_capacity(rows.len());
                        for row in rows {
                            records.push((
                                row.try_get::<String, _>("key")?,
                                row.try_get::<Vec<u8>, _>("data")?,
                            ));
                        }
                        Ok(records)
                    }
                    Err(err) => {
                        if is_transient(&err) {
                            drop(conn.detach());
                        }
                        Err(err)
                    }
                }
            }
        })
        .await
        .map_err(|err| self.map_error(err))
    }

    /// Drain the pool; in-flight operations finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn map_error(&self, err: sqlx::Error) -> StoreError {
        if is_transient(&err) {
            StoreError::Unavailable {
                attempts: self.policy.max_attempts,
                message: err.to_string(),
            }
        } else {
            StoreError::Query(err.to_string())
        }
    }
}
