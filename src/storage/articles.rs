use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use super::kv::put_record;
use super::schema::Database;
use super::types::{Article, ArticleList};

// ============================================================================
// Key Layout
// ============================================================================

/// Article list without content, newest first
pub const ARTICLES_LIST_KEY: &str = "articlesList";
/// Epoch milliseconds of the last completed refresh
pub const LAST_UPDATED_KEY: &str = "lastUpdated";
/// Aggregated per-source failure message of the last refresh ("" when none)
pub const ERROR_KEY: &str = "error";

/// Per-article records outlive several refreshes so open links keep working,
/// but articles that dropped out of every feed eventually expire.
const ARTICLE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// KV key for a single article record
pub fn article_key(id: &str) -> String {
    format!("article:{id}")
}

impl Database {
    // ========================================================================
    // Article Cache Operations
    // ========================================================================

    /// Store the outcome of a refresh in one transaction.
    ///
    /// Writes every article (with feed content) under `article:<id>`, then the
    /// content-less list, the refresh timestamp and the error message. Readers
    /// never observe a list that references articles not yet written.
    pub async fn store_refresh(
        &self,
        articles: &[Article],
        error: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for article in articles {
            let json = serde_json::to_string(article)?;
            put_record(&mut *tx, &article_key(&article.id), &json, Some(ARTICLE_TTL)).await?;
        }

        let list = ArticleList {
            articles: articles.iter().map(Article::without_content).collect(),
        };
        put_record(&mut *tx, ARTICLES_LIST_KEY, &serde_json::to_string(&list)?, None).await?;
        put_record(
            &mut *tx,
            LAST_UPDATED_KEY,
            &updated_at.timestamp_millis().to_string(),
            None,
        )
        .await?;
        put_record(&mut *tx, ERROR_KEY, error.unwrap_or("").trim(), None).await?;

        tx.commit().await?;

        tracing::debug!(
            articles = articles.len(),
            has_error = error.is_some_and(|e| !e.trim().is_empty()),
            "Stored refreshed article list"
        );
        Ok(())
    }

    /// Record a refresh in which every source failed.
    ///
    /// Updates `lastUpdated` and `error` but keeps the previous article list
    /// and records, so a transient outage does not empty the cache.
    pub async fn store_failed_refresh(&self, error: &str, updated_at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        put_record(
            &mut *tx,
            LAST_UPDATED_KEY,
            &updated_at.timestamp_millis().to_string(),
            None,
        )
        .await?;
        put_record(&mut *tx, ERROR_KEY, error.trim(), None).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Load the cached article list, or `None` if no refresh has completed.
    pub async fn load_article_list(&self) -> Result<Option<ArticleList>> {
        let Some(json) = self.kv_get(ARTICLES_LIST_KEY).await? else {
            return Ok(None);
        };
        let list = serde_json::from_str(&json).context("Corrupt cached article list")?;
        Ok(Some(list))
    }

    /// Load a single cached article (with feed content, if any).
    pub async fn get_article(&self, id: &str) -> Result<Option<Article>> {
        let Some(json) = self.kv_get(&article_key(id)).await? else {
            return Ok(None);
        };
        let article = serde_json::from_str(&json)
            .with_context(|| format!("Corrupt cached article record '{id}'"))?;
        Ok(Some(article))
    }

    /// Time of the last completed refresh.
    ///
    /// # Errors
    ///
    /// Fails if the stored timestamp is not an integer number of milliseconds.
    pub async fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.kv_get(LAST_UPDATED_KEY).await? else {
            return Ok(None);
        };
        let millis: i64 = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {LAST_UPDATED_KEY} timestamp format: '{raw}'"))?;
        let at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .with_context(|| format!("{LAST_UPDATED_KEY} timestamp out of range: {millis}"))?;
        Ok(Some(at))
    }

    /// Error message from the last refresh, `None` when every source succeeded.
    pub async fn refresh_error(&self) -> Result<Option<String>> {
        Ok(self
            .kv_get(ERROR_KEY)
            .await?
            .filter(|message| !message.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn article(id: &str, hour: u32, content: Option<&str>) -> Article {
        Article {
            id: id.to_string(),
            title: format!("Article {id}"),
            url: format!("https://example.com/{id}"),
            snippet: format!("Snippet {id}"),
            content: content.map(str::to_string),
            source: "Example".to_string(),
            feed_url: Some("https://example.com/feed".to_string()),
            publication_datetime: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_empty_cache() {
        let db = test_db().await;
        assert!(db.load_article_list().await.unwrap().is_none());
        assert!(db.get_article("x").await.unwrap().is_none());
        assert!(db.last_updated().await.unwrap().is_none());
        assert!(db.refresh_error().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_refresh_round_trip() {
        let db = test_db().await;
        let articles = vec![
            article("b", 12, Some("<p>Full body</p>")),
            article("a", 9, None),
        ];
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();

        db.store_refresh(&articles, None, now).await.unwrap();

        let list = db.load_article_list().await.unwrap().unwrap();
        assert_eq!(list.articles.len(), 2);
        assert_eq!(list.articles[0].id, "b");
        assert!(list.articles.iter().all(|a| a.content.is_none()));

        let full = db.get_article("b").await.unwrap().unwrap();
        assert_eq!(full.content.as_deref(), Some("<p>Full body</p>"));

        assert_eq!(db.last_updated().await.unwrap(), Some(now));
        assert_eq!(db.refresh_error().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_error_stored_and_cleared() {
        let db = test_db().await;
        let now = Utc::now();

        db.store_refresh(&[], Some("Failed to fetch Example. "), now)
            .await
            .unwrap();
        assert_eq!(
            db.refresh_error().await.unwrap().as_deref(),
            Some("Failed to fetch Example.")
        );

        db.store_refresh(&[], None, now).await.unwrap();
        assert_eq!(db.refresh_error().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_articles() {
        let db = test_db().await;
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        db.store_refresh(&[article("a", 1, None)], None, first)
            .await
            .unwrap();

        db.store_failed_refresh("Failed to fetch Example.", later)
            .await
            .unwrap();

        let list = db.load_article_list().await.unwrap().unwrap();
        assert_eq!(list.articles.len(), 1);
        assert_eq!(db.last_updated().await.unwrap(), Some(later));
        assert_eq!(
            db.refresh_error().await.unwrap().as_deref(),
            Some("Failed to fetch Example.")
        );
    }

    #[tokio::test]
    async fn test_article_records_have_ttl() {
        let db = test_db().await;
        db.store_refresh(&[article("a", 1, None)], None, Utc::now())
            .await
            .unwrap();

        let (expires,): (Option<String>,) =
            sqlx::query_as("SELECT expires_at FROM kv WHERE key = 'article:a'")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert!(expires.is_some());

        let (list_expires,): (Option<String>,) =
            sqlx::query_as("SELECT expires_at FROM kv WHERE key = 'articlesList'")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert!(list_expires.is_none());
    }

    #[tokio::test]
    async fn test_invalid_last_updated_is_error() {
        let db = test_db().await;
        db.kv_put(LAST_UPDATED_KEY, "yesterday", None).await.unwrap();
        let err = db.last_updated().await.unwrap_err();
        assert!(err.to_string().contains("Invalid lastUpdated timestamp format"));
    }

    #[tokio::test]
    async fn test_corrupt_list_is_error() {
        let db = test_db().await;
        db.kv_put(ARTICLES_LIST_KEY, "{not json", None).await.unwrap();
        assert!(db.load_article_list().await.is_err());
    }
}
