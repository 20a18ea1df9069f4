//! Tag repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{MediaRecord, Tag};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

/// User-defined labels attached to media
#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn create(&self, name: &str) -> Result<Tag>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Tag>>;

    async fn rename(&self, id: i64, name: &str) -> Result<()>;

    /// Delete a tag and its `tagged_items` rows in one transaction
    async fn delete(&self, id: i64) -> Result<bool>;

    async fn list(&self) -> Result<Vec<Tag>>;

    /// Attach a tag to media; already-tagged items are left alone
    async fn tag(&self, tag_id: i64, media_ids: &[i64]) -> Result<u64>;

    async fn untag(&self, tag_id: i64, media_ids: &[i64]) -> Result<u64>;

    async fn tags_for_media(&self, media_id: i64) -> Result<Vec<Tag>>;

    async fn media_for_tag(&self, tag_id: i64) -> Result<Vec<MediaRecord>>;
}

/// SQLite implementation of TagRepository
pub struct SqliteTagRepository {
    pool: SqlitePool,
}

impl SqliteTagRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn validate_name(name: &str) -> Result<&str> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(LibraryError::invalid("tag", "name must not be empty"));
        }
        Ok(trimmed)
    }
}

#[async_trait]
impl TagRepository for SqliteTagRepository {
    async fn create(&self, name: &str) -> Result<Tag> {
        let name = Self::validate_name(name)?;
        let created_at = chrono::Utc::now().timestamp();

        let id = query("INSERT INTO tags (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(created_at)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(Tag {
            id,
            name: name.to_string(),
            created_at,
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Tag>> {
        let tag = query_as::<_, Tag>("SELECT * FROM tags WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(tag)
    }

    async fn rename(&self, id: i64, name: &str) -> Result<()> {
        let name = Self::validate_name(name)?;
        let result = query("UPDATE tags SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found("tag", id));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM tagged_items WHERE tag_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Tag>> {
        let tags = query_as::<_, Tag>("SELECT * FROM tags ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(tags)
    }

    async fn tag(&self, tag_id: i64, media_ids: &[i64]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut tagged = 0;

        for media_id in media_ids {
            tagged += query(
                "INSERT OR IGNORE INTO tagged_items (tag_id, media_id, tagged_at) VALUES (?, ?, ?)",
            )
            .bind(tag_id)
            .bind(media_id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(tagged)
    }

    async fn untag(&self, tag_id: i64, media_ids: &[i64]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for media_id in media_ids {
            removed += query("DELETE FROM tagged_items WHERE tag_id = ? AND media_id = ?")
                .bind(tag_id)
                .bind(media_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn tags_for_media(&self, media_id: i64) -> Result<Vec<Tag>> {
        let tags = query_as::<_, Tag>(
            r#"
            SELECT t.* FROM tags t
            JOIN tagged_items ti ON ti.tag_id = t.id
            WHERE ti.media_id = ?
            ORDER BY t.name ASC
            "#,
        )
        .bind(media_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tags)
    }

    async fn media_for_tag(&self, tag_id: i64) -> Result<Vec<MediaRecord>> {
        let records = query_as::<_, MediaRecord>(
            r#"
            SELECT m.* FROM media m
            JOIN tagged_items ti ON ti.media_id = m.id
            WHERE ti.tag_id = ?
            ORDER BY m.date_taken DESC, m.id DESC
            "#,
        )
        .bind(tag_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
