//! Secure folder path mapping (`secureditementity` table)
//!
//! Only the secure folder manager writes through this repository.

use crate::error::Result;
use crate::models::SecureMapping;
use crate::repositories::media::delete_media_rows;
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait SecureMappingRepository: Send + Sync {
    /// Persist a mapping and drop the media row it came from, atomically
    async fn record_secured(&self, mapping: &SecureMapping, media_id: Option<i64>) -> Result<()>;

    async fn find_by_original_path(&self, original_path: &str) -> Result<Option<SecureMapping>>;

    async fn find_by_secured_path(&self, secured_path: &str) -> Result<Option<SecureMapping>>;

    async fn list(&self) -> Result<Vec<SecureMapping>>;

    /// Mappings still holding plaintext (`iv IS NULL`)
    async fn list_unencrypted(&self) -> Result<Vec<SecureMapping>>;

    /// Replace the secured location and ivs after an encrypt-in-place
    async fn update_encryption(&self, mapping: &SecureMapping) -> Result<bool>;

    async fn remove(&self, original_path: &str) -> Result<bool>;

    async fn count(&self) -> Result<i64>;
}

pub struct SqliteSecureMappingRepository {
    pool: SqlitePool,
}

impl SqliteSecureMappingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecureMappingRepository for SqliteSecureMappingRepository {
    async fn record_secured(&self, mapping: &SecureMapping, media_id: Option<i64>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        query(
            r#"
            INSERT INTO secureditementity (
                original_path, secured_path, iv, thumbnail_path, thumbnail_iv,
                mime_type, display_name, date_taken, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&mapping.original_path)
        .bind(&mapping.secured_path)
        .bind(&mapping.iv)
        .bind(&mapping.thumbnail_path)
        .bind(&mapping.thumbnail_iv)
        .bind(&mapping.mime_type)
        .bind(&mapping.display_name)
        .bind(mapping.date_taken)
        .bind(mapping.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(media_id) = media_id {
            delete_media_rows(&mut tx, &[media_id]).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_original_path(&self, original_path: &str) -> Result<Option<SecureMapping>> {
        let mapping = query_as::<_, SecureMapping>(
            "SELECT * FROM secureditementity WHERE original_path = ?",
        )
        .bind(original_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn find_by_secured_path(&self, secured_path: &str) -> Result<Option<SecureMapping>> {
        let mapping = query_as::<_, SecureMapping>(
            "SELECT * FROM secureditementity WHERE secured_path = ?",
        )
        .bind(secured_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn list(&self) -> Result<Vec<SecureMapping>> {
        let mappings = query_as::<_, SecureMapping>(
            "SELECT * FROM secureditementity ORDER BY created_at DESC, original_path ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(mappings)
    }

    async fn list_unencrypted(&self) -> Result<Vec<SecureMapping>> {
        let mappings = query_as::<_, SecureMapping>(
            "SELECT * FROM secureditementity WHERE iv IS NULL OR length(iv) = 0",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(mappings)
    }

    async fn update_encryption(&self, mapping: &SecureMapping) -> Result<bool> {
        let result = query(
            r#"
            UPDATE secureditementity SET
                secured_path = ?, iv = ?, thumbnail_path = ?, thumbnail_iv = ?
            WHERE original_path = ?
            "#,
        )
        .bind(&mapping.secured_path)
        .bind(&mapping.iv)
        .bind(&mapping.thumbnail_path)
        .bind(&mapping.thumbnail_iv)
        .bind(&mapping.original_path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, original_path: &str) -> Result<bool> {
        let result = query("DELETE FROM secureditementity WHERE original_path = ?")
            .bind(original_path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM secureditementity")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
