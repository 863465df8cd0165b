//! `PostgreSQL` implementation of the `KeyValueStore` trait.
//!
//! All keys live in one `kv_entries` table. Per-key atomicity comes from the
//! primary key (`INSERT … ON CONFLICT DO NOTHING` for create-if-absent) and
//! from single-statement updates. Change notifications travel through
//! `LISTEN`/`NOTIFY`, so every node sharing the database sees every write.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use pollroom_core::error::StoreError;
use pollroom_core::store::{KeyPath, KeyValueStore, StoreChange, Subscription};

use crate::memory::DEFAULT_CHANGE_CAPACITY;

/// Channel the `kv_entries` trigger notifies on.
pub const CHANGE_CHANNEL: &str = "pollroom_changes";

/// PostgreSQL-backed key-value store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<StoreChange>,
}

impl PgStore {
    /// Creates a store over `pool` and starts relaying database
    /// notifications to subscribers.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the listener connection cannot be
    /// opened.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        let (changes, _) = broadcast::channel(DEFAULT_CHANGE_CAPACITY);
        let mut listener = PgListener::connect_with(&pool).await.map_err(map_sqlx)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(map_sqlx)?;

        let store = Self { pool, changes };
        tokio::spawn(store.clone().relay_notifications(listener));
        Ok(store)
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }

    async fn relay_notifications(self, mut listener: PgListener) {
        loop {
            match listener.try_recv().await {
                Ok(Some(notification)) => {
                    let key = KeyPath::parse(notification.payload());
                    // Payload carries only the key; subscribers get the value
                    // as it stands now, which is never older than the write.
                    let change = match self.get(&key).await {
                        Ok(value) => StoreChange::Updated { key, value },
                        Err(e) => {
                            warn!(error = %e, key = %key, "failed to read changed key");
                            StoreChange::Resync
                        }
                    };
                    let _ = self.changes.send(change);
                }
                Ok(None) => {
                    // Connection dropped; sqlx reconnects on the next call but
                    // notifications sent meanwhile are gone.
                    warn!("change listener reconnecting; subscribers must resync");
                    let _ = self.changes.send(StoreChange::Resync);
                }
                Err(e) => {
                    warn!(error = %e, "change listener failed");
                    let _ = self.changes.send(StoreChange::Resync);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
            if self.changes.receiver_count() == 0 && self.pool.is_closed() {
                debug!("pool closed; stopping change relay");
                return;
            }
        }
    }
}

/// Escapes `LIKE` metacharacters so participant tokens containing `_` match
/// literally.
fn like_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn subtree_pattern(prefix: &KeyPath) -> String {
    format!("{}/%", like_escape(prefix.as_str()))
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Corrupt {
            key: String::from("<row>"),
            reason: err.to_string(),
        },
        // 22xxx: data exceptions, e.g. a counter key holding a non-integer.
        sqlx::Error::Database(ref db) if db.code().is_some_and(|code| code.starts_with("22")) => {
            StoreError::Corrupt {
                key: String::from("<row>"),
                reason: err.to_string(),
            }
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &KeyPath) -> Result<Option<Value>, StoreError> {
        sqlx::query_scalar::<_, Value>("SELECT value FROM kv_entries WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn set(&self, key: &KeyPath, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv_entries (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn remove(&self, key: &KeyPath) -> Result<Option<Value>, StoreError> {
        sqlx::query_scalar::<_, Value>("DELETE FROM kv_entries WHERE key = $1 RETURNING value")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn create_if_absent(&self, key: &KeyPath, value: Value) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO kv_entries (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        match result.rows_affected() {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(StoreError::Atomicity(format!(
                "create-if-absent on {key} affected {n} rows"
            ))),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &KeyPath,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        let Some(expected) = expected else {
            return self.create_if_absent(key, new).await;
        };
        let result = sqlx::query(
            "UPDATE kv_entries SET value = $2, updated_at = NOW() \
             WHERE key = $1 AND value = $3",
        )
        .bind(key.as_str())
        .bind(new)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        match result.rows_affected() {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(StoreError::Atomicity(format!(
                "compare-and-swap on {key} affected {n} rows"
            ))),
        }
    }

    async fn increment(&self, key: &KeyPath, delta: i64) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO kv_entries (key, value) VALUES ($1, to_jsonb($2::BIGINT)) \
             ON CONFLICT (key) DO UPDATE \
             SET value = to_jsonb((kv_entries.value #>> '{}')::BIGINT + $2), updated_at = NOW() \
             RETURNING (value #>> '{}')::BIGINT",
        )
        .bind(key.as_str())
        .bind(delta)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match map_sqlx(e) {
            StoreError::Corrupt { reason, .. } => StoreError::Corrupt {
                key: key.to_string(),
                reason,
            },
            other => other,
        })
    }

    async fn list(&self, prefix: &KeyPath) -> Result<Vec<(KeyPath, Value)>, StoreError> {
        let rows: Vec<(String, Value)> = if prefix.as_str().is_empty() {
            sqlx::query_as::<_, (String, Value)>("SELECT key, value FROM kv_entries ORDER BY key")
                .fetch_all(&self.pool)
                .await
        } else {
            sqlx::query_as::<_, (String, Value)>(
                "SELECT key, value FROM kv_entries WHERE key = $1 OR key LIKE $2 ORDER BY key",
            )
            .bind(prefix.as_str())
            .bind(subtree_pattern(prefix))
            .fetch_all(&self.pool)
            .await
        }
        .map_err(map_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|(key, value)| (KeyPath::parse(&key), value))
            .collect())
    }

    async fn remove_prefix(&self, prefix: &KeyPath) -> Result<u64, StoreError> {
        let result = if prefix.as_str().is_empty() {
            sqlx::query("DELETE FROM kv_entries")
                .execute(&self.pool)
                .await
        } else {
            sqlx::query("DELETE FROM kv_entries WHERE key = $1 OR key LIKE $2")
                .bind(prefix.as_str())
                .bind(subtree_pattern(prefix))
                .execute(&self.pool)
                .await
        }
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    fn subscribe(&self, prefix: &KeyPath) -> Subscription {
        Subscription::new(prefix.clone(), self.changes.subscribe())
    }
}
