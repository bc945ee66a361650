use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use url::Url;

use super::discovery::FeedLocator;
use super::http::FetchError;
use crate::storage::{Database, DatabaseError, FeedQuery};
use crate::util::{retry, RetryPolicy};

/// Counts from one [`MaintenanceService::run_cleanup`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub folders_removed: usize,
    pub feeds_removed: usize,
    pub failing_feeds_removed: usize,
}

/// Store housekeeping: merges duplicate folders and feeds and drops feeds
/// that no longer answer.
#[derive(Clone)]
pub struct MaintenanceService {
    db: Database,
    locator: FeedLocator,
    policy: RetryPolicy,
}

impl MaintenanceService {
    pub fn new(db: Database, locator: FeedLocator) -> Self {
        Self::with_policy(db, locator, RetryPolicy::default())
    }

    pub fn with_policy(db: Database, locator: FeedLocator, policy: RetryPolicy) -> Self {
        Self {
            db,
            locator,
            policy,
        }
    }

    /// Run the three cleanup passes in order.
    ///
    /// For folders and feeds the row with the lowest id is canonical.
    /// Feeds of a duplicate folder move to the canonical folder before it is
    /// deleted; duplicate feeds are deleted along with their articles.
    /// A feed is evicted only when every probe attempt fails; one success
    /// leaves it untouched. A stored URL that does not parse or that the host
    /// policy rejects counts as failing. Cancellation stops probing before the next feed.
    pub async fn run_cleanup(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CleanupResult, DatabaseError> {
        let mut result = CleanupResult {
            folders_removed: self.merge_duplicate_folders().await?,
            feeds_removed: self.remove_duplicate_feeds().await?,
            ..CleanupResult::default()
        };

        for feed in self.db.query_feeds(&FeedQuery::all()).await? {
            if cancel.is_cancelled() {
                tracing::info!("Cleanup cancelled before liveness probes finished");
                break;
            }

            // A policy rejection fails each attempt like any other fetch error
            let alive = match Url::parse(&feed.url) {
                Ok(url) => retry(self.policy, |_| self.locator.probe(&url)).await,
                Err(e) => Err(FetchError::InvalidUrl(e.to_string())),
            };
            if let Err(e) = alive {
                tracing::info!(
                    feed = %feed.url,
                    attempts = self.policy.max_attempts,
                    error = %e,
                    "Removing unreachable feed"
                );
                if self.db.delete_feed(feed.id).await? {
                    result.failing_feeds_removed += 1;
                }
            }
        }

        tracing::info!(
            folders_removed = result.folders_removed,
            feeds_removed = result.feeds_removed,
            failing_feeds_removed = result.failing_feeds_removed,
            "Cleanup finished"
        );
        Ok(result)
    }

    async fn merge_duplicate_folders(&self) -> Result<usize, DatabaseError> {
        let mut canonical: HashMap<String, i64> = HashMap::new();
        let mut removed = 0;

        // folders() is ordered by id, so the first name seen wins
        for folder in self.db.folders().await? {
            match canonical.get(&folder.name) {
                Some(&keep) => {
                    let moved = self.db.merge_folder_into(folder.id, keep).await?;
                    tracing::debug!(folder = %folder.name, moved, "Merged duplicate folder");
                    removed += 1;
                }
                None => {
                    canonical.insert(folder.name, folder.id);
                }
            }
        }
        Ok(removed)
    }

    async fn remove_duplicate_feeds(&self) -> Result<usize, DatabaseError> {
        let mut seen: HashMap<String, i64> = HashMap::new();
        let mut removed = 0;

        for feed in self.db.query_feeds(&FeedQuery::all()).await? {
            if let Some(&keep) = seen.get(&feed.url) {
                tracing::debug!(feed = %feed.url, kept = keep, dropped = feed.id, "Removing duplicate feed");
                if self.db.delete_feed(feed.id).await? {
                    removed += 1;
                }
            } else {
                seen.insert(feed.url, feed.id);
            }
        }
        Ok(removed)
    }
}
