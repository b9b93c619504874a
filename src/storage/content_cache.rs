use anyhow::Result;

use super::schema::Database;
use super::types::{CacheStats, CachedContent};
use crate::content::ContentSource;

/// Default TTL for cached content (72 hours)
const DEFAULT_TTL_HOURS: i64 = 72;

impl Database {
    // ========================================================================
    // Content Cache Operations
    // ========================================================================

    /// Cache extracted article content with a TTL.
    ///
    /// Inserts or replaces the cached HTML for the given article.
    /// `size_bytes` is computed from the HTML byte length.
    /// `expires_at` is computed as `now + ttl_hours`.
    ///
    /// # Arguments
    ///
    /// * `article_id` - The article id (see [`crate::storage::Article::id`])
    /// * `html` - Sanitized content produced by the extraction pipeline
    /// * `source` - Which pipeline step produced it
    /// * `ttl_hours` - Hours until this cache entry expires (use `None` for default 72h)
    pub async fn cache_content(
        &self,
        article_id: &str,
        html: &str,
        source: ContentSource,
        ttl_hours: Option<i64>,
    ) -> Result<()> {
        let ttl = ttl_hours.unwrap_or(DEFAULT_TTL_HOURS).max(1);
        let size_bytes = html.len() as i64;
        let ttl_modifier = format!("+{ttl} hours");

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO content_cache
                (article_id, html, source, fetched_at, expires_at, size_bytes)
            VALUES (?, ?, ?, datetime('now'), datetime('now', ?), ?)
        "#,
        )
        .bind(article_id)
        .bind(html)
        .bind(source.as_str())
        .bind(&ttl_modifier)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve cached content if it has not expired.
    ///
    /// Returns `None` if no cache entry exists, if the entry has expired, or
    /// if the stored source tag is unknown (written by a newer version).
    pub async fn get_cached_content(&self, article_id: &str) -> Result<Option<CachedContent>> {
        let row: Option<(String, String, String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT article_id, html, source, fetched_at, expires_at, size_bytes
            FROM content_cache
            WHERE article_id = ? AND expires_at > datetime('now')
        "#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((article_id, html, source, fetched_at, expires_at, size_bytes)) = row else {
            return Ok(None);
        };
        let Some(source) = ContentSource::parse(&source) else {
            tracing::warn!(article_id = %article_id, source = %source, "Unknown content source in cache, ignoring entry");
            return Ok(None);
        };

        Ok(Some(CachedContent {
            article_id,
            html,
            source,
            fetched_at,
            expires_at,
            size_bytes,
        }))
    }

    /// Compute aggregate cache statistics.
    ///
    /// Returns live KV record count, content cache entry count and size, and
    /// oldest/newest content `fetched_at` timestamps.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let (kv_entries,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM kv WHERE expires_at IS NULL OR expires_at > datetime('now')",
        )
        .fetch_one(&self.pool)
        .await?;

        let row: (i64, Option<i64>, Option<String>, Option<String>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(size_bytes), MIN(fetched_at), MAX(fetched_at)
            FROM content_cache
        "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            kv_entries,
            content_entries: row.0,
            content_size_bytes: row.1.unwrap_or(0),
            oldest_content: row.2,
            newest_content: row.3,
        })
    }
}
