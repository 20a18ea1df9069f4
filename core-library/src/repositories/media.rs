//! Media repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{AlbumSelector, MediaRecord};
use crate::repositories::{Page, PageRequest};
use async_trait::async_trait;
use sqlx::{query, query_as, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

/// Media repository interface for the local media index
#[async_trait]
pub trait MediaRepository: Send + Sync {
    /// Find a media record by its media store id
    async fn find_by_id(&self, id: i64) -> Result<Option<MediaRecord>>;

    /// Find a media record by absolute path
    async fn find_by_path(&self, path: &str) -> Result<Option<MediaRecord>>;

    /// Fetch several records at once; missing ids are skipped
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<MediaRecord>>;

    /// Insert or update a chunk of records inside one transaction
    ///
    /// Local-only columns (remote reference, content hash, custom album) are
    /// preserved for existing rows. A different row holding the same path is
    /// replaced. Returns the number of rows written.
    async fn upsert_chunk(&self, records: &[MediaRecord]) -> Result<u64>;

    /// Delete records by id inside one transaction, removing tag and
    /// favourite rows first. Returns the number of media rows deleted.
    async fn delete_ids(&self, ids: &[i64]) -> Result<u64>;

    /// All media ids in the index
    async fn all_ids(&self) -> Result<Vec<i64>>;

    /// `id -> date_modified` for every record
    async fn modification_stamps(&self) -> Result<HashMap<i64, i64>>;

    /// Newest first
    async fn query(&self, page_request: PageRequest) -> Result<Page<MediaRecord>>;

    async fn query_by_album(
        &self,
        album: &AlbumSelector,
        page_request: PageRequest,
    ) -> Result<Page<MediaRecord>>;

    /// Every member of an album, newest first
    async fn list_by_album(&self, album: &AlbumSelector) -> Result<Vec<MediaRecord>>;

    /// Folder albums with their item counts, largest first
    async fn list_folders(&self) -> Result<Vec<(String, i64)>>;

    /// Set the favourite flag and keep `favouriteditementity` in step
    ///
    /// Returns `false` when the record does not exist.
    async fn set_favourite(&self, id: i64, favourite: bool) -> Result<bool>;

    async fn list_favourites(&self) -> Result<Vec<MediaRecord>>;

    /// Record where an uploaded item lives on the remote server
    async fn set_remote_reference(
        &self,
        id: i64,
        remote_url: Option<&str>,
        remote_thumbnail: Option<&str>,
    ) -> Result<bool>;

    async fn count(&self) -> Result<i64>;
}

/// SQLite implementation of MediaRepository
pub struct SqliteMediaRepository {
    pool: SqlitePool,
}

impl SqliteMediaRepository {
    /// Create a new SQLite media repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Delete media rows and everything that references them.
///
/// Runs on the caller's connection so it can join a wider transaction.
pub(crate) async fn delete_media_rows(conn: &mut SqliteConnection, ids: &[i64]) -> Result<u64> {
    let mut deleted = 0;
    for id in ids {
        query("DELETE FROM tagged_items WHERE media_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        query("DELETE FROM favouriteditementity WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        deleted += query("DELETE FROM media WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(deleted)
}

async fn sync_favourite_row(
    conn: &mut SqliteConnection,
    id: i64,
    path: &str,
    favourite: bool,
) -> Result<()> {
    if favourite {
        query(
            r#"
            INSERT INTO favouriteditementity (id, path, date_added) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET path = excluded.path
            "#,
        )
        .bind(id)
        .bind(path)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *conn)
        .await?;
    } else {
        query("DELETE FROM favouriteditementity WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn album_filter(builder: &mut QueryBuilder<'_, Sqlite>, album: &AlbumSelector) {
    match album {
        AlbumSelector::Folder(path) => {
            builder.push(" WHERE parent_path = ").push_bind(path.clone());
        }
        AlbumSelector::Custom(id) => {
            builder.push(" WHERE custom_album_id = ").push_bind(*id);
        }
    }
}

#[async_trait]
impl MediaRepository for SqliteMediaRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<MediaRecord>> {
        let record = query_as::<_, MediaRecord>("SELECT * FROM media WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<MediaRecord>> {
        let record = query_as::<_, MediaRecord>("SELECT * FROM media WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<MediaRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM media WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id ASC");

        let records = builder
            .build_query_as::<MediaRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn upsert_chunk(&self, records: &[MediaRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        for record in records {
            record
                .validate()
                .map_err(|msg| LibraryError::invalid("media", msg))?;
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for record in records {
            let stale: Vec<(i64,)> = query_as("SELECT id FROM media WHERE path = ? AND id != ?")
                .bind(&record.path)
                .bind(record.id)
                .fetch_all(&mut *tx)
                .await?;
            if !stale.is_empty() {
                let stale_ids: Vec<i64> = stale.into_iter().map(|(id,)| id).collect();
                debug!(path = %record.path, ?stale_ids, "Replacing media rows that reused a path");
                delete_media_rows(&mut tx, &stale_ids).await?;
            }

            written += query(
                r#"
                INSERT INTO media (
                    id, path, parent_path, display_name, mime_type, kind,
                    date_taken, date_modified, size, favourite,
                    remote_url, remote_thumbnail, content_hash, custom_album_id
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    path = excluded.path,
                    parent_path = excluded.parent_path,
                    display_name = excluded.display_name,
                    mime_type = excluded.mime_type,
                    kind = excluded.kind,
                    date_taken = excluded.date_taken,
                    date_modified = excluded.date_modified,
                    size = excluded.size,
                    favourite = excluded.favourite
                "#,
            )
            .bind(record.id)
            .bind(&record.path)
            .bind(&record.parent_path)
            .bind(&record.display_name)
            .bind(&record.mime_type)
            .bind(record.kind)
            .bind(record.date_taken)
            .bind(record.date_modified)
            .bind(record.size)
            .bind(record.favourite)
            .bind(&record.remote_url)
            .bind(&record.remote_thumbnail)
            .bind(&record.content_hash)
            .bind(record.custom_album_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            sync_favourite_row(&mut tx, record.id, &record.path, record.favourite).await?;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn delete_ids(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let deleted = delete_media_rows(&mut tx, ids).await?;
        tx.commit().await?;

        Ok(deleted)
    }

    async fn all_ids(&self) -> Result<Vec<i64>> {
        let ids = query_as::<_, (i64,)>("SELECT id FROM media ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.into_iter().map(|(id,)| id).collect())?;

        Ok(ids)
    }

    async fn modification_stamps(&self) -> Result<HashMap<i64, i64>> {
        let stamps = query_as::<_, (i64, i64)>("SELECT id, date_modified FROM media")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        Ok(stamps)
    }

    async fn query(&self, page_request: PageRequest) -> Result<Page<MediaRecord>> {
        let total = self.count().await?;

        let records = query_as::<_, MediaRecord>(
            "SELECT * FROM media ORDER BY date_taken DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(page_request.limit())
        .bind(page_request.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(records, total as u64, page_request))
    }

    async fn query_by_album(
        &self,
        album: &AlbumSelector,
        page_request: PageRequest,
    ) -> Result<Page<MediaRecord>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM media");
        album_filter(&mut count, album);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM media");
        album_filter(&mut builder, album);
        builder
            .push(" ORDER BY date_taken DESC, id DESC LIMIT ")
            .push_bind(page_request.limit())
            .push(" OFFSET ")
            .push_bind(page_request.offset());

        let records = builder
            .build_query_as::<MediaRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(records, total as u64, page_request))
    }

    async fn list_by_album(&self, album: &AlbumSelector) -> Result<Vec<MediaRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM media");
        album_filter(&mut builder, album);
        builder.push(" ORDER BY date_taken DESC, id DESC");

        let records = builder
            .build_query_as::<MediaRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn list_folders(&self) -> Result<Vec<(String, i64)>> {
        let folders = query_as::<_, (String, i64)>(
            r#"
            SELECT parent_path, COUNT(*) AS items FROM media
            GROUP BY parent_path
            ORDER BY items DESC, parent_path ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(folders)
    }

    async fn set_favourite(&self, id: i64, favourite: bool) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let path: Option<(String,)> = query_as("SELECT path FROM media WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((path,)) = path else {
            return Ok(false);
        };

        query("UPDATE media SET favourite = ? WHERE id = ?")
            .bind(favourite)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sync_favourite_row(&mut tx, id, &path, favourite).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_favourites(&self) -> Result<Vec<MediaRecord>> {
        let records = query_as::<_, MediaRecord>(
            r#"
            SELECT m.* FROM media m
            JOIN favouriteditementity f ON f.id = m.id
            ORDER BY f.date_added DESC, m.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn set_remote_reference(
        &self,
        id: i64,
        remote_url: Option<&str>,
        remote_thumbnail: Option<&str>,
    ) -> Result<bool> {
        let result = query("UPDATE media SET remote_url = ?, remote_thumbnail = ? WHERE id = ?")
            .bind(remote_url)
            .bind(remote_thumbnail)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = query_as("SELECT COUNT(*) as count FROM media")
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn setup_repo() -> SqliteMediaRepository {
        SqliteMediaRepository::new(create_test_pool().await.unwrap())
    }

    fn record(id: i64, path: &str, date_modified: i64) -> MediaRecord {
        let mut record = MediaRecord::new(id, path, "image/jpeg");
        record.date_modified = date_modified;
        record.date_taken = Some(date_modified);
        record.size = 1024;
        record
    }

    #[core_async::test]
    async fn test_upsert_and_find() {
        let repo = setup_repo().await;
        let written = repo
            .upsert_chunk(&[
                record(1, "/DCIM/Camera/a.jpg", 100),
                record(2, "/DCIM/Camera/b.jpg", 200),
            ])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let found = repo.find_by_id(2).await.unwrap().unwrap();
        assert_eq!(found.display_name, "b.jpg");
        assert_eq!(found.parent_path, "/DCIM/Camera");
        assert_eq!(
            repo.find_by_path("/DCIM/Camera/a.jpg").await.unwrap().map(|r| r.id),
            Some(1)
        );
        assert_eq!(repo.all_ids().await.unwrap(), vec![1, 2]);
    }

    #[core_async::test]
    async fn test_upsert_preserves_local_columns() {
        let repo = setup_repo().await;
        repo.upsert_chunk(&[record(1, "/DCIM/a.jpg", 100)])
            .await
            .unwrap();
        repo.set_remote_reference(1, Some("https://photos/asset/1"), None)
            .await
            .unwrap();

        repo.upsert_chunk(&[record(1, "/DCIM/a.jpg", 150)])
            .await
            .unwrap();

        let found = repo.find_by_id(1).await.unwrap().unwrap();
        assert_eq!(found.date_modified, 150);
        assert_eq!(found.remote_url.as_deref(), Some("https://photos/asset/1"));
    }

    #[core_async::test]
    async fn test_upsert_replaces_row_reusing_path() {
        let repo = setup_repo().await;
        repo.upsert_chunk(&[record(1, "/DCIM/a.jpg", 100)])
            .await
            .unwrap();
        repo.set_favourite(1, true).await.unwrap();

        repo.upsert_chunk(&[record(9, "/DCIM/a.jpg", 300)])
            .await
            .unwrap();

        assert!(repo.find_by_id(1).await.unwrap().is_none());
        assert_eq!(repo.all_ids().await.unwrap(), vec![9]);
        assert!(repo.list_favourites().await.unwrap().is_empty());
    }

    #[core_async::test]
    async fn test_upsert_rejects_invalid_chunk_atomically() {
        let repo = setup_repo().await;
        let result = repo
            .upsert_chunk(&[record(1, "/DCIM/a.jpg", 1), record(2, "", 1)])
            .await;

        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[core_async::test]
    async fn test_delete_ids_removes_dependents() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteMediaRepository::new(pool.clone());
        repo.upsert_chunk(&[record(1, "/a.jpg", 1), record(2, "/b.jpg", 1)])
            .await
            .unwrap();
        repo.set_favourite(1, true).await.unwrap();
        query("INSERT INTO tags (id, name, created_at) VALUES (1, 'trip', 0)")
            .execute(&pool)
            .await
            .unwrap();
        query("INSERT INTO tagged_items (tag_id, media_id, tagged_at) VALUES (1, 1, 0)")
            .execute(&pool)
            .await
            .unwrap();

        let deleted = repo.delete_ids(&[1, 42]).await.unwrap();
        assert_eq!(deleted, 1);

        let (tagged,): (i64,) = query_as("SELECT COUNT(*) FROM tagged_items")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(tagged, 0);
        assert!(repo.list_favourites().await.unwrap().is_empty());
        assert_eq!(repo.all_ids().await.unwrap(), vec![2]);
    }

    #[core_async::test]
    async fn test_modification_stamps() {
        let repo = setup_repo().await;
        repo.upsert_chunk(&[record(1, "/a.jpg", 10), record(2, "/b.jpg", 20)])
            .await
            .unwrap();

        let stamps = repo.modification_stamps().await.unwrap();
        assert_eq!(stamps.get(&1), Some(&10));
        assert_eq!(stamps.get(&2), Some(&20));
    }

    #[core_async::test]
    async fn test_album_queries() {
        let repo = setup_repo().await;
        repo.upsert_chunk(&[
            record(1, "/DCIM/Camera/a.jpg", 10),
            record(2, "/DCIM/Camera/b.jpg", 20),
            record(3, "/Pictures/c.jpg", 30),
        ])
        .await
        .unwrap();

        let camera = AlbumSelector::Folder("/DCIM/Camera".into());
        let page = repo
            .query_by_album(&camera, PageRequest::new(0, 1))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, 2);
        assert!(page.has_next());

        let members: Vec<i64> = repo
            .list_by_album(&camera)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(members, vec![2, 1]);

        let folders = repo.list_folders().await.unwrap();
        assert_eq!(folders[0], ("/DCIM/Camera".to_string(), 2));

        let all = repo.query(PageRequest::default()).await.unwrap();
        assert_eq!(all.items.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 2, 1]);
    }

    #[core_async::test]
    async fn test_favourite_toggle() {
        let repo = setup_repo().await;
        repo.upsert_chunk(&[record(1, "/a.jpg", 1)]).await.unwrap();

        assert!(repo.set_favourite(1, true).await.unwrap());
        assert!(repo.find_by_id(1).await.unwrap().unwrap().favourite);
        assert_eq!(repo.list_favourites().await.unwrap().len(), 1);

        assert!(repo.set_favourite(1, false).await.unwrap());
        assert!(repo.list_favourites().await.unwrap().is_empty());
        assert!(!repo.set_favourite(99, true).await.unwrap());
    }

    #[core_async::test]
    async fn test_find_by_ids_skips_missing() {
        let repo = setup_repo().await;
        repo.upsert_chunk(&[record(1, "/a.jpg", 1), record(3, "/c.jpg", 1)])
            .await
            .unwrap();

        let found = repo.find_by_ids(&[3, 2, 1]).await.unwrap();
        assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
        assert!(repo.find_by_ids(&[]).await.unwrap().is_empty());
    }
}
