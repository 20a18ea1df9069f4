//! Trash bin repository (`trasheditementity` table)

use crate::error::Result;
use crate::models::TrashedRecord;
use crate::repositories::media::delete_media_rows;
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait TrashRepository: Send + Sync {
    /// Record a trashed file and drop its media row in one transaction
    async fn record_trashed(&self, record: &TrashedRecord) -> Result<()>;

    async fn find_by_original_path(&self, original_path: &str) -> Result<Option<TrashedRecord>>;

    /// Most recently trashed first
    async fn list(&self) -> Result<Vec<TrashedRecord>>;

    /// Drop a record after restore or permanent deletion
    async fn remove(&self, original_path: &str) -> Result<bool>;

    async fn count(&self) -> Result<i64>;
}

pub struct SqliteTrashRepository {
    pool: SqlitePool,
}

impl SqliteTrashRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrashRepository for SqliteTrashRepository {
    async fn record_trashed(&self, record: &TrashedRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        query(
            r#"
            INSERT INTO trasheditementity (
                original_path, trashed_path, media_id, date_taken,
                mime_type, display_name, trashed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(original_path) DO UPDATE SET
                trashed_path = excluded.trashed_path,
                media_id = excluded.media_id,
                trashed_at = excluded.trashed_at
            "#,
        )
        .bind(&record.original_path)
        .bind(&record.trashed_path)
        .bind(record.media_id)
        .bind(record.date_taken)
        .bind(&record.mime_type)
        .bind(&record.display_name)
        .bind(record.trashed_at)
        .execute(&mut *tx)
        .await?;

        if let Some(media_id) = record.media_id {
            delete_media_rows(&mut tx, &[media_id]).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_original_path(&self, original_path: &str) -> Result<Option<TrashedRecord>> {
        let record = query_as::<_, TrashedRecord>(
            "SELECT * FROM trasheditementity WHERE original_path = ?",
        )
        .bind(original_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list(&self) -> Result<Vec<TrashedRecord>> {
        let records = query_as::<_, TrashedRecord>(
            "SELECT * FROM trasheditementity ORDER BY trashed_at DESC, original_path ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn remove(&self, original_path: &str) -> Result<bool> {
        let result = query("DELETE FROM trasheditementity WHERE original_path = ?")
            .bind(original_path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM trasheditementity")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::MediaRecord;
    use crate::repositories::{MediaRepository, SqliteMediaRepository};

    fn trashed(original: &str, media_id: Option<i64>, at: i64) -> TrashedRecord {
        TrashedRecord {
            original_path: original.to_string(),
            trashed_path: format!("/trash/{}", at),
            media_id,
            date_taken: Some(1_700_000_000),
            mime_type: "image/jpeg".into(),
            display_name: "a.jpg".into(),
            trashed_at: at,
        }
    }

    #[core_async::test]
    async fn test_record_trashed_removes_media_row() {
        let pool = create_test_pool().await.unwrap();
        let media = SqliteMediaRepository::new(pool.clone());
        let trash = SqliteTrashRepository::new(pool);
        media
            .upsert_chunk(&[MediaRecord::new(4, "/DCIM/a.jpg", "image/jpeg")])
            .await
            .unwrap();
        media.set_favourite(4, true).await.unwrap();

        trash
            .record_trashed(&trashed("/DCIM/a.jpg", Some(4), 10))
            .await
            .unwrap();

        assert!(media.find_by_id(4).await.unwrap().is_none());
        let found = trash.find_by_original_path("/DCIM/a.jpg").await.unwrap();
        assert_eq!(found.unwrap().trashed_path, "/trash/10");
    }

    #[core_async::test]
    async fn test_list_and_remove() {
        let pool = create_test_pool().await.unwrap();
        let trash = SqliteTrashRepository::new(pool);
        trash.record_trashed(&trashed("/a.jpg", None, 1)).await.unwrap();
        trash.record_trashed(&trashed("/b.jpg", None, 2)).await.unwrap();

        let listed = trash.list().await.unwrap();
        assert_eq!(listed[0].original_path, "/b.jpg");
        assert_eq!(trash.count().await.unwrap(), 2);

        assert!(trash.remove("/a.jpg").await.unwrap());
        assert!(!trash.remove("/a.jpg").await.unwrap());
        assert_eq!(trash.count().await.unwrap(), 1);
    }
}
