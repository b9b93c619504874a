//! Request handlers for the front-end API.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::config::Config;
use crate::content::{
    html_to_text, ContentFetcher, ContentPipeline, ContentSource, ExtractedContent,
    MIN_CONTENT_CHARS,
};
use crate::http::build_client;
use crate::refresh::{refresh_status, Refresher};
use crate::storage::{Article, Database};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Shared state for all handlers.
pub struct AppState {
    pub db: Database,
    pub pipeline: ContentPipeline,
    pub refresher: Refresher,
    /// Lifetime of extracted content in the content cache
    pub content_ttl_hours: i64,
}

impl AppState {
    /// Build the state from configuration, sharing one HTTP client between
    /// feed refreshes and content extraction.
    pub fn new(config: &Config, db: Database) -> reqwest::Result<Self> {
        let client = build_client(config)?;
        Ok(Self {
            db,
            pipeline: ContentPipeline::new(ContentFetcher::new(
                client.clone(),
                config.allow_private_hosts,
            )),
            refresher: Refresher::new(client, config.sources.clone(), config.refresh_interval()),
            content_ttl_hours: config.content_ttl_hours,
        })
    }
}

/// Body of `GET /articles`.
#[derive(Debug, Serialize)]
pub struct ArticlesResponse {
    pub articles: Vec<Article>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of the content endpoints.
#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub content: String,
    pub source: ContentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ExtractedContent> for ContentResponse {
    fn from(extracted: ExtractedContent) -> Self {
        Self {
            content: extracted.html,
            source: extracted.source,
            title: extracted.title,
            error: extracted.error,
        }
    }
}

/// Query of `GET /content`.
#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    pub url: String,
    pub feed: Option<String>,
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /articles - The cached article list, refreshed first if stale.
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ArticlesResponse>, ApiError> {
    // A failed refresh still serves whatever is cached
    if let Err(e) = state.refresher.refresh_if_stale(&state.db, Utc::now()).await {
        tracing::error!(error = %e, "Lazy refresh failed");
    }

    let list = state.db.load_article_list().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to load article list");
        ApiError::internal("Failed to load articles")
    })?;

    let Some(list) = list else {
        return Ok(Json(ArticlesResponse {
            articles: Vec::new(),
            error: Some("No articles found".to_string()),
        }));
    };

    let error = state.db.refresh_error().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to read refresh error");
        None
    });

    Ok(Json(ArticlesResponse {
        articles: list.articles,
        error,
    }))
}

/// GET /article/:id - The stored article record, with feed content if any.
pub async fn get_article(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Article>, ApiError> {
    load_article(&state, &id).await.map(Json)
}

/// GET /article/:id/content - Full content through the content cache.
pub async fn get_article_content(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ContentResponse>, ApiError> {
    let article = load_article(&state, &id).await?;

    match state.db.get_cached_content(&id).await {
        Ok(Some(cached)) => {
            tracing::debug!(article_id = %id, source = %cached.source, "Content cache hit");
            return Ok(Json(ContentResponse {
                content: cached.html,
                source: cached.source,
                title: None,
                error: None,
            }));
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(article_id = %id, error = %e, "Content cache read failed"),
    }

    let extracted = match stored_feed_content(&article) {
        Some(html) => ExtractedContent {
            html,
            source: ContentSource::Feed,
            title: None,
            error: None,
        },
        None => {
            state
                .pipeline
                .extract(&article.url, article.feed_url.as_deref(), &article.snippet)
                .await
        }
    };

    // Snippet fallbacks are not cached so the next request retries the page
    if extracted.source != ContentSource::Snippet {
        if let Err(e) = state
            .db
            .cache_content(
                &id,
                &extracted.html,
                extracted.source,
                Some(state.content_ttl_hours),
            )
            .await
        {
            tracing::warn!(article_id = %id, error = %e, "Failed to cache content");
        }
    }

    Ok(Json(extracted.into()))
}

/// GET /content?url=..&feed=.. - Extract an arbitrary article.
pub async fn extract_content(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContentQuery>,
) -> Result<Json<ContentResponse>, ApiError> {
    let fetcher = state.pipeline.fetcher();
    fetcher
        .check_url(&query.url)
        .map_err(|e| ApiError::bad_request(format!("Invalid URL: {e}")))?;
    if let Some(feed) = &query.feed {
        fetcher
            .check_url(feed)
            .map_err(|e| ApiError::bad_request(format!("Invalid feed URL: {e}")))?;
    }

    let extracted = state
        .pipeline
        .extract(&query.url, query.feed.as_deref(), "")
        .await;
    Ok(Json(extracted.into()))
}

/// GET /refresh_status - When the cache was last refreshed and when the next
/// refresh is due.
pub async fn get_refresh_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    match refresh_status(&state.db).await {
        Ok(Some(status)) => Ok(([(header::CACHE_CONTROL, NO_CACHE)], Json(status))),
        Ok(None) => Err(ApiError::not_found("No update information available")),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read refresh status");
            Err(ApiError::internal("Failed to retrieve refresh status"))
        }
    }
}

async fn load_article(state: &AppState, id: &str) -> Result<Article, ApiError> {
    state
        .db
        .get_article(id)
        .await
        .map_err(|e| {
            tracing::error!(article_id = %id, error = %e, "Failed to load article");
            ApiError::internal("Failed to load article")
        })?
        .ok_or_else(|| ApiError::not_found("Article not found").plain_text())
}

/// Feed content captured at refresh time, if it is long enough to stand in
/// for the article. It was sanitized when stored.
fn stored_feed_content(article: &Article) -> Option<String> {
    article
        .content
        .as_ref()
        .filter(|html| html_to_text(html).chars().count() >= MIN_CONTENT_CHARS)
        .cloned()
}
