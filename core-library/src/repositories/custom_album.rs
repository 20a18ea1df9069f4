//! Custom album repository (`custom_media` table)

use crate::error::{LibraryError, Result};
use crate::models::{AlbumSelector, CustomAlbum};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait CustomAlbumRepository: Send + Sync {
    async fn create(&self, name: &str) -> Result<CustomAlbum>;

    async fn find_by_id(&self, id: i64) -> Result<Option<CustomAlbum>>;

    async fn rename(&self, id: i64, name: &str) -> Result<()>;

    /// Delete an album after detaching its members, in one transaction.
    ///
    /// Member media stay in the index.
    async fn delete(&self, id: i64) -> Result<bool>;

    async fn list(&self) -> Result<Vec<CustomAlbum>>;

    /// Move media into an album, replacing any previous membership
    async fn assign(&self, album_id: i64, media_ids: &[i64]) -> Result<u64>;

    async fn unassign(&self, media_ids: &[i64]) -> Result<u64>;
}

pub struct SqliteCustomAlbumRepository {
    pool: SqlitePool,
}

impl SqliteCustomAlbumRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomAlbumRepository for SqliteCustomAlbumRepository {
    async fn create(&self, name: &str) -> Result<CustomAlbum> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::invalid("album", "name must not be empty"));
        }
        let created_at = chrono::Utc::now().timestamp();

        let id = query("INSERT INTO custom_media (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(created_at)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(CustomAlbum {
            id,
            name: name.to_string(),
            created_at,
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<CustomAlbum>> {
        let album = query_as::<_, CustomAlbum>("SELECT * FROM custom_media WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(album)
    }

    async fn rename(&self, id: i64, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::invalid("album", "name must not be empty"));
        }

        let result = query("UPDATE custom_media SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found("custom album", id));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        query("UPDATE media SET custom_album_id = NULL WHERE custom_album_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        query("DELETE FROM immichduplicateentity WHERE album_id = ?")
            .bind(AlbumSelector::Custom(id).key())
            .execute(&mut *tx)
            .await?;
        let result = query("DELETE FROM custom_media WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<CustomAlbum>> {
        let albums = query_as::<_, CustomAlbum>("SELECT * FROM custom_media ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(albums)
    }

    async fn assign(&self, album_id: i64, media_ids: &[i64]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = query_as("SELECT id FROM custom_media WHERE id = ?")
            .bind(album_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(LibraryError::not_found("custom album", album_id));
        }

        let mut assigned = 0;
        for media_id in media_ids {
            assigned += query("UPDATE media SET custom_album_id = ? WHERE id = ?")
                .bind(album_id)
                .bind(media_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(assigned)
    }

    async fn unassign(&self, media_ids: &[i64]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut cleared = 0;

        for media_id in media_ids {
            cleared += query(
                "UPDATE media SET custom_album_id = NULL WHERE id = ? AND custom_album_id IS NOT NULL",
            )
            .bind(media_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::MediaRecord;
    use crate::repositories::{MediaRepository, SqliteMediaRepository};

    #[core_async::test]
    async fn test_album_lifecycle() {
        let pool = create_test_pool().await.unwrap();
        let media = SqliteMediaRepository::new(pool.clone());
        let albums = SqliteCustomAlbumRepository::new(pool);
        media
            .upsert_chunk(&[
                MediaRecord::new(1, "/DCIM/a.jpg", "image/jpeg"),
                MediaRecord::new(2, "/DCIM/b.jpg", "image/jpeg"),
            ])
            .await
            .unwrap();

        let album = albums.create("Best of").await.unwrap();
        assert_eq!(albums.assign(album.id, &[1, 2, 3]).await.unwrap(), 2);

        let selector = AlbumSelector::Custom(album.id);
        assert_eq!(media.list_by_album(&selector).await.unwrap().len(), 2);

        assert_eq!(albums.unassign(&[2]).await.unwrap(), 1);
        assert_eq!(media.list_by_album(&selector).await.unwrap().len(), 1);

        albums.rename(album.id, "Favourites 2024").await.unwrap();
        assert_eq!(
            albums.find_by_id(album.id).await.unwrap().unwrap().name,
            "Favourites 2024"
        );

        assert!(albums.delete(album.id).await.unwrap());
        assert!(media.find_by_id(1).await.unwrap().unwrap().custom_album_id.is_none());
        assert!(albums.list().await.unwrap().is_empty());
    }

    #[core_async::test]
    async fn test_assign_to_missing_album_fails() {
        let pool = create_test_pool().await.unwrap();
        let albums = SqliteCustomAlbumRepository::new(pool);
        assert!(matches!(
            albums.assign(5, &[1]).await,
            Err(LibraryError::NotFound { .. })
        ));
    }
}
