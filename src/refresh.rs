//! Cache refresh: fetch every source and rewrite the article cache.
//!
//! There is no background timer. The cache is refreshed lazily when a reader
//! finds it older than the refresh interval, or explicitly from the CLI.

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::SourceConfig;
use crate::feed::refresh_all;
use crate::storage::Database;

/// Summary of one refresh run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub articles: usize,
    pub failed_sources: usize,
    pub skipped_entries: usize,
    pub error: Option<String>,
}

/// Runs refreshes, allowing at most one at a time per process.
pub struct Refresher {
    client: reqwest::Client,
    sources: Vec<SourceConfig>,
    interval: Duration,
    lock: Mutex<()>,
}

impl Refresher {
    pub fn new(client: reqwest::Client, sources: Vec<SourceConfig>, interval: Duration) -> Self {
        Self {
            client,
            sources,
            interval,
            lock: Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch all sources and store the result.
    ///
    /// When every source fails the previous articles are kept and only the
    /// timestamp and error message are updated.
    pub async fn refresh(&self, db: &Database) -> Result<RefreshOutcome> {
        let report = refresh_all(&self.client, &self.sources).await;
        let error = report.error_message();
        let now = Utc::now();

        let all_failed = !self.sources.is_empty() && report.failures.len() == self.sources.len();
        match (&error, all_failed) {
            (Some(message), true) => {
                tracing::warn!(sources = self.sources.len(), "Every source failed, keeping cached articles");
                db.store_failed_refresh(message, now).await?;
            }
            _ => db.store_refresh(&report.articles, error.as_deref(), now).await?,
        }

        let outcome = RefreshOutcome {
            articles: report.articles.len(),
            failed_sources: report.failures.len(),
            skipped_entries: report.skipped,
            error,
        };
        tracing::info!(
            articles = outcome.articles,
            failed_sources = outcome.failed_sources,
            skipped_entries = outcome.skipped_entries,
            "Refresh complete"
        );
        Ok(outcome)
    }

    /// Refresh if the cache is missing or older than the refresh interval.
    ///
    /// Concurrent callers queue on a lock; a caller that waited re-checks the
    /// timestamp, so a burst of requests against a stale cache triggers one
    /// refresh. Returns whether this call refreshed.
    pub async fn refresh_if_stale(&self, db: &Database, now: DateTime<Utc>) -> Result<bool> {
        if !self.is_stale(db, now).await {
            return Ok(false);
        }

        let _guard = self.lock.lock().await;
        if !self.is_stale(db, now.max(Utc::now())).await {
            tracing::debug!("Cache refreshed by another request while waiting");
            return Ok(false);
        }

        self.refresh(db).await?;
        Ok(true)
    }

    async fn is_stale(&self, db: &Database, now: DateTime<Utc>) -> bool {
        match db.last_updated().await {
            Ok(last) => is_stale(last, now, self.interval),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable refresh timestamp, treating cache as stale");
                true
            }
        }
    }
}

/// True if `last` is missing or more than `interval` before `now`.
pub fn is_stale(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    let Some(last) = last else {
        return true;
    };
    match TimeDelta::from_std(interval) {
        Ok(interval) => now.signed_duration_since(last) > interval,
        Err(_) => false,
    }
}

/// When the last refresh happened and when the next one is expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub last_update: DateTime<Utc>,
    pub next_refresh: DateTime<Utc>,
}

/// Refreshes are scheduled on the hour and half-hour: the next one after
/// `last` is :30 of the same hour if `last` is before :30, else the top of
/// the following hour.
pub fn next_refresh(last: DateTime<Utc>) -> DateTime<Utc> {
    let secs = last.timestamp();
    let hour_start = secs - secs.rem_euclid(3600);
    let minute = secs.rem_euclid(3600) / 60;
    let next = if minute < 30 {
        hour_start + 30 * 60
    } else {
        hour_start + 3600
    };
    DateTime::from_timestamp(next, 0).unwrap_or(last)
}

/// Current refresh status, `None` if the cache has never been refreshed.
///
/// # Errors
///
/// Fails if the stored timestamp is unreadable.
pub async fn refresh_status(db: &Database) -> Result<Option<RefreshStatus>> {
    Ok(db.last_updated().await?.map(|last_update| RefreshStatus {
        last_update,
        next_refresh: next_refresh(last_update),
    }))
}
