//! Remote duplicate-suppression state (`immichduplicateentity` table)

use crate::error::Result;
use crate::models::{DuplicateRecord, DuplicateRow};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait DuplicateRepository: Send + Sync {
    async fn get(&self, album_id: &str) -> Result<Option<DuplicateRecord>>;

    /// Replace the stored state for an album in one transaction
    async fn save(&self, record: &DuplicateRecord) -> Result<()>;

    async fn delete(&self, album_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<DuplicateRecord>>;
}

pub struct SqliteDuplicateRepository {
    pool: SqlitePool,
}

impl SqliteDuplicateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DuplicateRepository for SqliteDuplicateRepository {
    async fn get(&self, album_id: &str) -> Result<Option<DuplicateRecord>> {
        let row = query_as::<_, DuplicateRow>(
            "SELECT * FROM immichduplicateentity WHERE album_id = ?",
        )
        .bind(album_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DuplicateRecord::try_from).transpose()
    }

    async fn save(&self, record: &DuplicateRecord) -> Result<()> {
        let duplicates = serde_json::to_string(&record.duplicates)?;
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM immichduplicateentity WHERE album_id = ?")
            .bind(&record.album_id)
            .execute(&mut *tx)
            .await?;
        query(
            r#"
            INSERT INTO immichduplicateentity (album_id, remote_album_id, duplicates, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&record.album_id)
        .bind(&record.remote_album_id)
        .bind(duplicates)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, album_id: &str) -> Result<bool> {
        let result = query("DELETE FROM immichduplicateentity WHERE album_id = ?")
            .bind(album_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<DuplicateRecord>> {
        let rows = query_as::<_, DuplicateRow>(
            "SELECT * FROM immichduplicateentity ORDER BY album_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DuplicateRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[core_async::test]
    async fn test_save_replaces_state() {
        let repo = SqliteDuplicateRepository::new(create_test_pool().await.unwrap());
        let mut record = DuplicateRecord {
            album_id: "folder:/DCIM/Camera".into(),
            remote_album_id: Some("r-1".into()),
            duplicates: vec!["a.jpg-10".into(), "b.jpg-20".into()],
            updated_at: 1,
        };
        repo.save(&record).await.unwrap();

        record.duplicates.retain(|d| d != "a.jpg-10");
        record.updated_at = 2;
        repo.save(&record).await.unwrap();

        let stored = repo.get("folder:/DCIM/Camera").await.unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(repo.list().await.unwrap().len(), 1);

        assert!(repo.delete("folder:/DCIM/Camera").await.unwrap());
        assert!(repo.get("folder:/DCIM/Camera").await.unwrap().is_none());
    }

    #[core_async::test]
    async fn test_corrupt_duplicates_surface_as_error() {
        let pool = create_test_pool().await.unwrap();
        query("INSERT INTO immichduplicateentity (album_id, duplicates) VALUES ('x', 'not json')")
            .execute(&pool)
            .await
            .unwrap();

        let repo = SqliteDuplicateRepository::new(pool);
        assert!(repo.get("x").await.is_err());
    }
}
