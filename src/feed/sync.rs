use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::discovery::{DiscoveryError, FeedLocator};
use super::http::FetchError;
use super::parser::{ParseError, ParsedArticle, ParsedFeed};
use crate::storage::{Database, DatabaseError, Feed, NewArticle, NewFeed};

/// Feeds refreshed concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Errors from adding or refreshing a feed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A feed with this URL is already stored
    #[error("feed already exists: {0}")]
    DuplicateFeed(String),
    /// The input did not lead to a feed
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),
    /// The feed could not be fetched
    #[error("{0}")]
    Fetch(#[from] FetchError),
    /// The feed document could not be parsed
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// Storing the result failed
    #[error("{0}")]
    Database(#[from] DatabaseError),
}

/// Result of refreshing one feed.
///
/// Carries the feed id for correlation and either the count of newly
/// inserted articles or the error that stopped the refresh.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub feed_id: i64,
    pub url: String,
    pub result: Result<usize, SyncError>,
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregate view of a batch of [`RefreshOutcome`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub new_articles: usize,
}

impl From<&[RefreshOutcome]> for RefreshSummary {
    fn from(outcomes: &[RefreshOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut acc, outcome| {
                match &outcome.result {
                    Ok(count) => {
                        acc.succeeded += 1;
                        acc.new_articles += count;
                    }
                    Err(_) => acc.failed += 1,
                }
                acc
            })
    }
}

impl From<&ParsedArticle> for NewArticle {
    fn from(article: &ParsedArticle) -> Self {
        Self {
            external_id: article.external_id.clone(),
            title: article.title.clone(),
            author: article.author.clone(),
            content: article.content.clone(),
            summary: article.summary.clone(),
            url: article.url.clone(),
            published: article.published,
        }
    }
}

/// Feed row metadata taken from a parsed document.
pub(crate) fn feed_metadata(parsed: &ParsedFeed, url: &str, folder_id: Option<i64>) -> NewFeed {
    NewFeed {
        title: parsed.title.clone(),
        url: url.to_owned(),
        site_url: parsed.site_url.clone(),
        description: parsed.description.clone(),
        image_url: parsed.image_url.clone(),
        folder_id,
    }
}

pub(crate) fn new_articles(parsed: &ParsedFeed) -> Vec<NewArticle> {
    parsed.articles.iter().map(NewArticle::from).collect()
}

/// Merges fetched feeds into the store.
///
/// Network work goes through the [`FeedLocator`]; every write is a single
/// transaction in [`Database`], so a failed refresh never leaves partial
/// state behind.
#[derive(Clone)]
pub struct FeedSyncCoordinator {
    db: Database,
    locator: FeedLocator,
    batch_size: usize,
}

impl FeedSyncCoordinator {
    pub fn new(db: Database, locator: FeedLocator) -> Self {
        Self {
            db,
            locator,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the refresh batch size (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Subscribe to the feed behind `input`, optionally filing it in a folder.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Discovery`] if no feed could be found
    /// - [`SyncError::DuplicateFeed`] if the resolved URL is already stored
    /// - [`SyncError::Database`] if the insert fails
    pub async fn add_feed(&self, input: &str, folder_id: Option<i64>) -> Result<Feed, SyncError> {
        let (url, parsed) = self.locator.locate(input).await?;

        if self.db.feed_exists(url.as_str()).await? {
            return Err(SyncError::DuplicateFeed(url.to_string()));
        }

        let feed = self
            .db
            .insert_feed(
                &feed_metadata(&parsed, url.as_str(), folder_id),
                &new_articles(&parsed),
            )
            .await?;

        tracing::info!(
            feed = %url,
            feed_id = feed.id,
            articles = parsed.articles.len(),
            "Feed added"
        );
        Ok(feed)
    }

    /// Fetch one feed and merge it into the store.
    ///
    /// On failure the only write is recording the message in the feed's
    /// `last_error`. Metadata, `last_updated` and articles stay as they were.
    pub async fn refresh_feed(&self, feed: &Feed) -> RefreshOutcome {
        let result = self.fetch_and_apply(feed).await;

        match &result {
            Ok(inserted) => {
                tracing::debug!(feed = %feed.url, new_articles = inserted, "Feed refreshed");
            }
            Err(e) => {
                tracing::warn!(feed = %feed.url, error = %e, "Feed refresh failed");
                if let Err(db_err) = self.db.set_feed_error(feed.id, Some(&e.to_string())).await {
                    tracing::warn!(feed_id = feed.id, error = %db_err, "Failed to record feed error");
                }
            }
        }

        RefreshOutcome {
            feed_id: feed.id,
            url: feed.url.clone(),
            result,
        }
    }

    async fn fetch_and_apply(&self, feed: &Feed) -> Result<usize, SyncError> {
        let url = Url::parse(&feed.url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let parsed = self.locator.fetch_feed(&url).await?;

        let inserted = self
            .db
            .apply_refresh(
                feed.id,
                &feed_metadata(&parsed, &feed.url, feed.folder_id),
                &new_articles(&parsed),
            )
            .await?;
        Ok(inserted)
    }

    /// Refresh every feed in fixed-size concurrent batches.
    ///
    /// Each batch is joined before the next one starts, and one feed's
    /// failure never affects the others. `cancel` is checked between
    /// batches: refreshes already in flight finish, later batches are not
    /// started, and only attempted feeds appear in the result.
    pub async fn refresh_all(
        &self,
        feeds: &[Feed],
        cancel: &CancellationToken,
    ) -> Vec<RefreshOutcome> {
        let mut outcomes = Vec::with_capacity(feeds.len());

        for batch in feeds.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                tracing::info!(
                    completed = outcomes.len(),
                    remaining = feeds.len() - outcomes.len(),
                    "Refresh cancelled"
                );
                break;
            }
            outcomes.extend(join_all(batch.iter().map(|feed| self.refresh_feed(feed))).await);
        }

        let summary = RefreshSummary::from(outcomes.as_slice());
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            new_articles = summary.new_articles,
            "Refresh finished"
        );
        outcomes
    }

    /// Mark an article read or unread; returns its feed's new unread count.
    pub async fn set_read(&self, article_id: i64, read: bool) -> Result<i64, SyncError> {
        Ok(self.db.set_article_read(article_id, read).await?)
    }

    pub async fn set_starred(&self, article_id: i64, starred: bool) -> Result<(), SyncError> {
        Ok(self.db.set_article_starred(article_id, starred).await?)
    }

    /// Mark every article of a feed read; returns how many changed.
    pub async fn mark_feed_read(&self, feed_id: i64) -> Result<u64, SyncError> {
        Ok(self.db.mark_feed_read(feed_id).await?)
    }
}
