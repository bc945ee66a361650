use super::feeds::recompute_unread_count;
use super::schema::Database;
use super::types::{Article, DatabaseError};

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

const ARTICLE_COLUMNS: &str = "id, feed_id, external_id, title, author, content, summary, \
     url, published, read, starred, fetched_at";

impl Database {
    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Get articles for a feed, newest first.
    ///
    /// `limit` defaults to 500 and is capped at [`MAX_ARTICLES`].
    pub async fn articles_for_feed(
        &self,
        feed_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Article>, DatabaseError> {
        let limit = limit.unwrap_or(500).min(MAX_ARTICLES);
        let rows = sqlx::query_as::<_, Article>(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS}
            FROM articles
            WHERE feed_id = ?
            ORDER BY published DESC, id DESC
            LIMIT ?
        "#
        ))
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Look up one article by id.
    pub async fn article(&self, article_id: i64) -> Result<Option<Article>, DatabaseError> {
        let row = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"
        ))
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Count articles of a feed carrying `external_id` (0 or 1 by construction).
    pub async fn count_articles_with_external_id(
        &self,
        feed_id: i64,
        external_id: &str,
    ) -> Result<i64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ? AND external_id = ?")
                .bind(feed_id)
                .bind(external_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    // ========================================================================
    // Read / Starred State
    // ========================================================================

    /// Set an article's read flag and return its feed's new unread count.
    pub async fn set_article_read(&self, article_id: i64, read: bool) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64,)> =
            sqlx::query_as("UPDATE articles SET read = ? WHERE id = ? RETURNING feed_id")
                .bind(read)
                .bind(article_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((feed_id,)) = row else {
            return Err(DatabaseError::NotFound {
                entity: "article",
                id: article_id,
            });
        };

        let unread = recompute_unread_count(&mut tx, feed_id).await?;
        tx.commit().await?;
        Ok(unread)
    }

    /// Set an article's starred flag.
    pub async fn set_article_starred(
        &self,
        article_id: i64,
        starred: bool,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE articles SET starred = ? WHERE id = ?")
            .bind(starred)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "article",
                id: article_id,
            });
        }
        Ok(())
    }

    /// Mark every article of a feed read. Returns how many changed.
    pub async fn mark_feed_read(&self, feed_id: i64) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE articles SET read = 1 WHERE feed_id = ? AND read = 0")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        recompute_unread_count(&mut tx, feed_id).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
