use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedQuery, FeedSort, FolderScope, NewArticle, NewFeed};

pub(crate) const FEED_COLUMNS: &str = "id, title, url, site_url, description, image_url, \
     last_updated, folder_id, unread_count, last_error";

/// Batch size keeps bind parameters well under SQLite's 999 limit (8 columns * 50 = 400).
const ARTICLE_BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Fetch feeds matching `query`, honouring its sort and limit.
    pub async fn query_feeds(&self, query: &FeedQuery) -> Result<Vec<Feed>, DatabaseError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {FEED_COLUMNS} FROM feeds WHERE 1 = 1"));

        if let Some(url) = &query.url {
            builder.push(" AND url = ");
            builder.push_bind(url);
        }
        match query.folder {
            Some(FolderScope::In(folder_id)) => {
                builder.push(" AND folder_id = ");
                builder.push_bind(folder_id);
            }
            Some(FolderScope::Unfiled) => {
                builder.push(" AND folder_id IS NULL");
            }
            None => {}
        }
        match query.sort {
            FeedSort::Id => builder.push(" ORDER BY id"),
            FeedSort::Title => builder.push(" ORDER BY title COLLATE NOCASE, id"),
        };
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }

        let feeds = builder
            .build_query_as::<Feed>()
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    /// Look up a single feed by id.
    pub async fn feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Whether any feed already uses `url`.
    pub async fn feed_exists(&self, url: &str) -> Result<bool, DatabaseError> {
        let found = self.query_feeds(&FeedQuery::by_url(url).limit(1)).await?;
        Ok(!found.is_empty())
    }

    // ========================================================================
    // Feed Mutations
    // ========================================================================

    /// Insert a feed together with its first batch of articles.
    ///
    /// Both writes share one transaction, so a failure leaves no half-created
    /// feed behind. The caller is responsible for URL uniqueness.
    pub async fn insert_feed(
        &self,
        feed: &NewFeed,
        articles: &[NewArticle],
    ) -> Result<Feed, DatabaseError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (title, url, site_url, description, image_url, last_updated, folder_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(&feed.title)
        .bind(&feed.url)
        .bind(&feed.site_url)
        .bind(&feed.description)
        .bind(&feed.image_url)
        .bind(now)
        .bind(feed.folder_id)
        .fetch_one(&mut *tx)
        .await?;
        let feed_id = row.0;

        insert_new_articles(&mut tx, feed_id, articles).await?;
        recompute_unread_count(&mut tx, feed_id).await?;

        let inserted = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Apply a successful fetch to a feed atomically.
    ///
    /// Overwrites the mutable metadata, inserts only articles whose external
    /// id is new for this feed, recomputes the unread count and clears the
    /// last error. Returns the number of newly inserted articles.
    pub async fn apply_refresh(
        &self,
        feed_id: i64,
        meta: &NewFeed,
        articles: &[NewArticle],
    ) -> Result<usize, DatabaseError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE feeds
            SET title = ?, site_url = ?, description = ?, image_url = ?,
                last_updated = ?, last_error = NULL
            WHERE id = ?
        "#,
        )
        .bind(&meta.title)
        .bind(&meta.site_url)
        .bind(&meta.description)
        .bind(&meta.image_url)
        .bind(now)
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "feed",
                id: feed_id,
            });
        }

        let inserted = insert_new_articles(&mut tx, feed_id, articles).await?;
        recompute_unread_count(&mut tx, feed_id).await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Set or clear the last refresh error for a feed
    pub async fn set_feed_error(
        &self,
        feed_id: i64,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a feed. Its articles go with it (ON DELETE CASCADE).
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Insert articles that are new for `feed_id`, returning how many landed.
///
/// Relies on `UNIQUE(feed_id, external_id)`: existing rows are left exactly
/// as they are, user state included.
pub(crate) async fn insert_new_articles(
    tx: &mut Transaction<'_, Sqlite>,
    feed_id: i64,
    articles: &[NewArticle],
) -> Result<usize, DatabaseError> {
    let now = Utc::now();
    let mut total_inserted = 0usize;

    for chunk in articles.chunks(ARTICLE_BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO articles \
             (feed_id, external_id, title, author, content, summary, url, published, fetched_at) ",
        );
        builder.push_values(chunk, |mut b, article| {
            b.push_bind(feed_id)
                .push_bind(&article.external_id)
                .push_bind(&article.title)
                .push_bind(&article.author)
                .push_bind(&article.content)
                .push_bind(&article.summary)
                .push_bind(&article.url)
                .push_bind(article.published)
                .push_bind(now);
        });
        let result = builder.build().execute(&mut **tx).await?;
        total_inserted += result.rows_affected() as usize;
    }

    Ok(total_inserted)
}

/// Recompute the cached unread count for one feed inside `tx`.
pub(crate) async fn recompute_unread_count(
    tx: &mut Transaction<'_, Sqlite>,
    feed_id: i64,
) -> Result<i64, DatabaseError> {
    let row: (i64,) = sqlx::query_as(
        r#"
        UPDATE feeds
        SET unread_count = (SELECT COUNT(*) FROM articles WHERE feed_id = ? AND read = 0)
        WHERE id = ?
        RETURNING unread_count
    "#,
    )
    .bind(feed_id)
    .bind(feed_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.0)
}
