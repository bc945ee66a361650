use super::schema::Database;
use super::types::{DatabaseError, Folder};
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Folder Operations
    // ========================================================================

    /// Strip control characters and surrounding whitespace from a folder name.
    ///
    /// An empty result falls back to "Untitled" so OPML folders without a
    /// `text` attribute still get a usable name.
    fn sanitize_folder_name(name: &str) -> String {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            "Untitled".to_owned()
        } else {
            trimmed.to_owned()
        }
    }

    /// Create a folder at the end of the sort order.
    ///
    /// Duplicate names are accepted; maintenance merges them later.
    pub async fn create_folder(&self, name: &str) -> Result<Folder, DatabaseError> {
        let clean_name = Self::sanitize_folder_name(name);

        let folder = sqlx::query_as::<_, Folder>(
            r#"
            INSERT INTO folders (name, sort_order)
            VALUES (?, (SELECT COALESCE(MAX(sort_order), -1) + 1 FROM folders))
            RETURNING id, name, sort_order
        "#,
        )
        .bind(&clean_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(folder)
    }

    /// All folders in creation order.
    pub async fn folders(&self) -> Result<Vec<Folder>, DatabaseError> {
        let rows = sqlx::query_as::<_, Folder>("SELECT id, name, sort_order FROM folders ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// First folder (by id) carrying `name`.
    pub async fn folder_by_name(&self, name: &str) -> Result<Option<Folder>, DatabaseError> {
        let clean_name = Self::sanitize_folder_name(name);
        let row = sqlx::query_as::<_, Folder>(
            "SELECT id, name, sort_order FROM folders WHERE name = ? ORDER BY id LIMIT 1",
        )
        .bind(&clean_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Delete a folder. Its feeds survive unfiled (ON DELETE SET NULL).
    pub async fn delete_folder(&self, folder_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move every feed of `duplicate` into `canonical`, then delete `duplicate`.
    ///
    /// Returns the number of feeds reassigned.
    pub async fn merge_folder_into(
        &self,
        duplicate: i64,
        canonical: i64,
    ) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query("UPDATE feeds SET folder_id = ? WHERE folder_id = ?")
            .bind(canonical)
            .bind(duplicate)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(duplicate)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(moved.rows_affected())
    }
}
