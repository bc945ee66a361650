use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("Another tidings process appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A row the caller referenced no longer exists
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Insert Payloads
// ============================================================================

/// Metadata for a feed about to be inserted or refreshed.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub title: String,
    pub url: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub folder_id: Option<i64>,
}

/// Article row about to be inserted under a feed.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub external_id: String,
    pub title: String,
    pub author: Option<String>,
    pub content: String,
    pub summary: Option<String>,
    pub url: String,
    pub published: DateTime<Utc>,
}

// ============================================================================
// Query Types
// ============================================================================

/// Folder constraint for [`FeedQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderScope {
    /// Feeds filed under this folder
    In(i64),
    /// Feeds with no folder
    Unfiled,
}

/// Sort order for feed queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedSort {
    /// Insertion order (ascending id). Maintenance relies on this to pick
    /// the first-seen row as canonical.
    #[default]
    Id,
    /// Case-insensitive title
    Title,
}

/// Predicate + sort + limit for [`Database::query_feeds`](super::Database::query_feeds).
///
/// Every field is optional; the default query returns every feed by id.
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub url: Option<String>,
    pub folder: Option<FolderScope>,
    pub sort: FeedSort,
    pub limit: Option<i64>,
}

impl FeedQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn in_folder(scope: FolderScope) -> Self {
        Self {
            folder: Some(scope),
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort: FeedSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed data from database
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub folder_id: Option<i64>,
    pub unread_count: i64,
    /// Message from the most recent failed refresh, cleared on success
    pub last_error: Option<String>,
}

/// Article data from database
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub external_id: String,
    pub title: String,
    pub author: Option<String>,
    pub content: String,
    pub summary: Option<String>,
    pub url: String,
    pub published: DateTime<Utc>,
    pub read: bool,
    pub starred: bool,
    pub fetched_at: DateTime<Utc>,
}

/// Folder grouping feeds. Names are not unique until maintenance merges them.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub sort_order: i64,
}
