//! Directory-backed media source
//!
//! Walks a root directory for image and video files and hands out stable ids
//! for the lifetime of the process. Favourite and trashed flags live in
//! memory. Used by desktop tooling and integration tests in place of the
//! platform media registry.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    media_source::{mime_for_path, ColumnValue, MediaQuery, MediaRow, MediaSource},
};
use core_async::sync::{CancellationToken, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
struct Entry {
    path: PathBuf,
    date_taken: Option<i64>,
    favourite: bool,
    trashed: bool,
}

#[derive(Debug, Default)]
struct SourceState {
    entries: BTreeMap<i64, Entry>,
    by_path: HashMap<PathBuf, i64>,
    next_id: i64,
}

impl SourceState {
    fn id_for(&mut self, path: &Path) -> i64 {
        if let Some(id) = self.by_path.get(path) {
            return *id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_path.insert(path.to_path_buf(), id);
        self.entries.insert(
            id,
            Entry {
                path: path.to_path_buf(),
                ..Default::default()
            },
        );
        id
    }

    fn forget(&mut self, id: i64) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.by_path.remove(&entry.path);
        Some(entry)
    }
}

pub struct DirectoryMediaSource {
    root: PathBuf,
    state: RwLock<SourceState>,
}

impl DirectoryMediaSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: RwLock::new(SourceState::default()),
        }
    }

    /// Media files under the root, sorted. `None` if cancelled midway.
    async fn walk(&self, cancel: &CancellationToken) -> Result<Option<Vec<PathBuf>>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) => {
                    warn!(path = ?dir, error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            while let Some(entry) = read_dir.next_entry().await.map_err(BridgeError::Io)? {
                let file_type = entry.file_type().await.map_err(BridgeError::Io)?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && mime_for_path(&path).is_some() {
                    found.push(path);
                }
            }
        }

        found.sort();
        Ok(Some(found))
    }

    async fn row_for(id: i64, entry: &Entry) -> Option<MediaRow> {
        let metadata = if entry.trashed {
            fs::metadata(&entry.path).await.ok()
        } else {
            Some(fs::metadata(&entry.path).await.ok()?)
        };

        Some(MediaRow {
            id,
            path: Some(entry.path.to_string_lossy().into_owned()),
            display_name: entry
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            mime_type: mime_for_path(&entry.path).map(str::to_string),
            date_taken: entry.date_taken,
            date_modified: metadata.as_ref().and_then(|m| {
                m.modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
            }),
            size: metadata.as_ref().map(|m| m.len() as i64),
            favourite: Some(entry.favourite),
            trashed: Some(entry.trashed),
        })
    }
}

#[async_trait]
impl MediaSource for DirectoryMediaSource {
    async fn query(
        &self,
        query: &MediaQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<MediaRow>>> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(None);
        }
        let Some(files) = self.walk(cancel).await? else {
            return Ok(None);
        };

        let mut state = self.state.write().await;
        for file in &files {
            state.id_for(file);
        }

        let mut rows = Vec::new();
        let mut vanished = Vec::new();
        for (id, entry) in &state.entries {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if !query.matches(*id, entry.trashed) {
                continue;
            }
            match Self::row_for(*id, entry).await {
                Some(row) => rows.push(row.project(query)),
                None => vanished.push(*id),
            }
        }
        for id in vanished {
            state.forget(id);
        }

        debug!(root = ?self.root, rows = rows.len(), "Queried directory media source");
        Ok(Some(rows))
    }

    async fn update(&self, id: i64, values: &[ColumnValue]) -> Result<u64> {
        let mut state = self.state.write().await;
        let Some(mut entry) = state.forget(id) else {
            return Ok(0);
        };

        for value in values {
            match value {
                ColumnValue::Path(p) => entry.path = PathBuf::from(p),
                ColumnValue::DateTaken(v) => entry.date_taken = Some(*v),
                ColumnValue::Favourite(v) => entry.favourite = *v,
                ColumnValue::Trashed(v) => entry.trashed = *v,
                // Derived from the file itself.
                ColumnValue::DisplayName(_)
                | ColumnValue::MimeType(_)
                | ColumnValue::DateModified(_)
                | ColumnValue::Size(_) => {}
            }
        }

        state.by_path.insert(entry.path.clone(), id);
        state.entries.insert(id, entry);
        Ok(1)
    }

    async fn insert(&self, values: &[ColumnValue]) -> Result<Option<i64>> {
        let path = values
            .iter()
            .find_map(|v| match v {
                ColumnValue::Path(p) => Some(PathBuf::from(p)),
                _ => None,
            })
            .ok_or_else(|| BridgeError::OperationFailed("insert requires a path".to_string()))?;

        let id = {
            let mut state = self.state.write().await;
            state.id_for(&path)
        };
        self.update(id, values).await?;
        Ok(Some(id))
    }

    async fn delete(&self, id: i64) -> Result<u64> {
        let entry = self.state.write().await.forget(id);
        let Some(entry) = entry else {
            return Ok(0);
        };

        match fs::remove_file(&entry.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BridgeError::Io(e)),
        }
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::media_source::MediaColumn;

    async fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, b"data").await.unwrap();
    }

    #[core_async::test]
    async fn test_walk_assigns_stable_ids() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("DCIM/a.jpg")).await;
        touch(&tmp.path().join("DCIM/b.mp4")).await;
        touch(&tmp.path().join("notes.txt")).await;

        let source = DirectoryMediaSource::new(tmp.path());
        let cancel = CancellationToken::new();
        let first = source
            .query(&MediaQuery::full(), &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(first[1].mime_type.as_deref(), Some("video/mp4"));
        assert_eq!(first[0].size, Some(4));

        let again = source
            .query(&MediaQuery::ids_only(), &cancel)
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<i64> = again.iter().map(|r| r.id).collect();
        assert_eq!(ids, first.iter().map(|r| r.id).collect::<Vec<_>>());
        assert!(again[0].path.is_none());
    }

    #[core_async::test]
    async fn test_missing_root_and_cancellation_yield_none() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = DirectoryMediaSource::new(tmp.path().join("absent"));
        let cancel = CancellationToken::new();
        assert!(missing.query(&MediaQuery::full(), &cancel).await.unwrap().is_none());

        touch(&tmp.path().join("a.jpg")).await;
        let source = DirectoryMediaSource::new(tmp.path());
        cancel.cancel();
        assert!(source.query(&MediaQuery::full(), &cancel).await.unwrap().is_none());
    }

    #[core_async::test]
    async fn test_trashed_rows_hidden_unless_requested() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("a.jpg")).await;
        let source = DirectoryMediaSource::new(tmp.path());
        let cancel = CancellationToken::new();

        let rows = source.query(&MediaQuery::full(), &cancel).await.unwrap().unwrap();
        let id = rows[0].id;
        assert_eq!(
            source
                .update(id, &[ColumnValue::Trashed(true), ColumnValue::Favourite(true)])
                .await
                .unwrap(),
            1
        );

        let visible = source.query(&MediaQuery::full(), &cancel).await.unwrap().unwrap();
        assert!(visible.is_empty());

        let all = source
            .query(&MediaQuery::full().with_trashed(true), &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(all[0].trashed, Some(true));
        assert_eq!(all[0].favourite, Some(true));
    }

    #[core_async::test]
    async fn test_insert_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let restored = outside.path().join("restored.png");
        touch(&restored).await;

        let source = DirectoryMediaSource::new(tmp.path());
        let id = source
            .insert(&[
                ColumnValue::Path(restored.to_string_lossy().into_owned()),
                ColumnValue::DateTaken(42),
            ])
            .await
            .unwrap()
            .unwrap();

        let cancel = CancellationToken::new();
        let query = MediaQuery {
            columns: vec![MediaColumn::Id, MediaColumn::DateTaken],
            ..MediaQuery::full()
        };
        let rows = source.query(&query, &cancel).await.unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date_taken, Some(42));

        assert_eq!(source.delete(id).await.unwrap(), 1);
        assert!(!restored.exists());
        assert_eq!(source.delete(id).await.unwrap(), 0);
    }
}
