use anyhow::Result;
use sqlx::SqliteConnection;
use std::time::Duration;

use super::schema::Database;

/// SQLite `datetime()` modifier for a TTL, e.g. `+3600 seconds`.
///
/// `None` binds as NULL, and `datetime('now', NULL)` is NULL, which stores
/// the record without an expiry.
pub(crate) fn ttl_modifier(ttl: Option<Duration>) -> Option<String> {
    ttl.map(|ttl| format!("+{} seconds", ttl.as_secs().max(1)))
}

/// Upsert one record on an existing connection (pool connection or transaction).
pub(crate) async fn put_record(
    conn: &mut SqliteConnection,
    key: &str,
    value: &str,
    ttl: Option<Duration>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO kv (key, value, updated_at, expires_at)
        VALUES (?, ?, datetime('now'), datetime('now', ?))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at
    "#,
    )
    .bind(key)
    .bind(value)
    .bind(ttl_modifier(ttl))
    .execute(conn)
    .await?;

    Ok(())
}

impl Database {
    // ========================================================================
    // Key-Value Operations
    // ========================================================================

    /// Get a value by key.
    ///
    /// Returns `None` if the key does not exist or its TTL has passed.
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value FROM kv
            WHERE key = ? AND (expires_at IS NULL OR expires_at > datetime('now'))
        "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Store a value (UPSERT), optionally expiring after `ttl`.
    ///
    /// Writing an existing key replaces both its value and its expiry.
    pub async fn kv_put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        put_record(&mut *conn, key, value, ttl).await
    }

    /// Delete a key. Returns true if a record was removed.
    pub async fn kv_delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List live keys starting with `prefix`, ordered by key.
    ///
    /// The prefix is compared literally (no LIKE wildcards), so ids containing
    /// `%` or `_` are safe.
    pub async fn kv_list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT key FROM kv
            WHERE substr(key, 1, length(?)) = ?
              AND (expires_at IS NULL OR expires_at > datetime('now'))
            ORDER BY key
        "#,
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    /// Delete all expired KV records and content cache entries.
    ///
    /// Returns the number of rows evicted across both tables.
    pub async fn evict_expired(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let kv = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= datetime('now')")
            .execute(&mut *tx)
            .await?;
        let content = sqlx::query("DELETE FROM content_cache WHERE expires_at <= datetime('now')")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let evicted = kv.rows_affected() + content.rows_affected();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired cache entries");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;
    use std::time::Duration;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let db = test_db().await;
        assert_eq!(db.kv_get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let db = test_db().await;
        db.kv_put("lastUpdated", "1700000000000", None).await.unwrap();
        assert_eq!(
            db.kv_get("lastUpdated").await.unwrap().as_deref(),
            Some("1700000000000")
        );
    }

    #[tokio::test]
    async fn test_put_overwrites_value_and_expiry() {
        let db = test_db().await;
        db.kv_put("k", "old", Some(Duration::from_secs(60))).await.unwrap();
        db.kv_put("k", "new", None).await.unwrap();

        assert_eq!(db.kv_get("k").await.unwrap().as_deref(), Some("new"));
        let (expires,): (Option<String>,) = sqlx::query_as("SELECT expires_at FROM kv WHERE key = 'k'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert!(expires.is_none());
    }

    #[tokio::test]
    async fn test_expired_key_reads_as_missing() {
        let db = test_db().await;
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES ('gone', 'x', datetime('now', '-1 second'))",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert_eq!(db.kv_get("gone").await.unwrap(), None);
        assert!(db.kv_list_prefix("go").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let db = test_db().await;
        db.kv_put("k", "v", None).await.unwrap();
        assert!(db.kv_delete("k").await.unwrap());
        assert!(!db.kv_delete("k").await.unwrap());
        assert_eq!(db.kv_get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_prefix_is_literal() {
        let db = test_db().await;
        db.kv_put("article:a", "1", None).await.unwrap();
        db.kv_put("article:b", "2", None).await.unwrap();
        db.kv_put("articlesList", "[]", None).await.unwrap();
        db.kv_put("article_x", "3", None).await.unwrap();

        let keys = db.kv_list_prefix("article:").await.unwrap();
        assert_eq!(keys, vec!["article:a".to_string(), "article:b".to_string()]);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let db = test_db().await;
        db.kv_put("live", "1", Some(Duration::from_secs(3600))).await.unwrap();
        db.kv_put("forever", "2", None).await.unwrap();
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES ('dead', 'x', datetime('now', '-1 minute'))",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert_eq!(db.evict_expired().await.unwrap(), 1);
        assert!(db.kv_get("live").await.unwrap().is_some());
        assert!(db.kv_get("forever").await.unwrap().is_some());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
