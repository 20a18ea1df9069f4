//! External Media Source
//!
//! The platform's authoritative registry of on-device media files. The core
//! reads and writes it only through [`MediaSource`]; every call is treated as
//! unreliable, so a missing cursor is modelled as `Ok(None)` rather than an
//! error.

use std::path::Path;

use async_trait::async_trait;
use core_async::sync::CancellationToken;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Columns a query may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaColumn {
    Id,
    Path,
    DisplayName,
    MimeType,
    DateTaken,
    DateModified,
    Size,
    Favourite,
    Trashed,
}

impl MediaColumn {
    /// Every column, as requested when fetching full metadata.
    pub const ALL: [MediaColumn; 9] = [
        MediaColumn::Id,
        MediaColumn::Path,
        MediaColumn::DisplayName,
        MediaColumn::MimeType,
        MediaColumn::DateTaken,
        MediaColumn::DateModified,
        MediaColumn::Size,
        MediaColumn::Favourite,
        MediaColumn::Trashed,
    ];
}

/// Which ids a query is restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdFilter {
    All,
    Ids(Vec<i64>),
}

/// A projection + selection over the media registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaQuery {
    pub columns: Vec<MediaColumn>,
    pub ids: IdFilter,
    /// Include rows the platform has flagged as trashed.
    pub include_trashed: bool,
}

impl MediaQuery {
    /// The cheap id-only enumeration used to diff membership.
    pub fn ids_only() -> Self {
        Self {
            columns: vec![MediaColumn::Id],
            ids: IdFilter::All,
            include_trashed: false,
        }
    }

    /// Ids together with their modification stamp.
    pub fn modification_stamps() -> Self {
        Self {
            columns: vec![MediaColumn::Id, MediaColumn::DateModified],
            ids: IdFilter::All,
            include_trashed: false,
        }
    }

    /// Full metadata for the given ids.
    pub fn full_for(ids: Vec<i64>) -> Self {
        Self {
            columns: MediaColumn::ALL.to_vec(),
            ids: IdFilter::Ids(ids),
            include_trashed: false,
        }
    }

    /// Full metadata for every row.
    pub fn full() -> Self {
        Self {
            columns: MediaColumn::ALL.to_vec(),
            ids: IdFilter::All,
            include_trashed: false,
        }
    }

    pub fn with_trashed(mut self, include: bool) -> Self {
        self.include_trashed = include;
        self
    }

    pub fn requests(&self, column: MediaColumn) -> bool {
        self.columns.contains(&column)
    }

    /// Whether a row with `id` and `trashed` flag passes the selection.
    pub fn matches(&self, id: i64, trashed: bool) -> bool {
        if trashed && !self.include_trashed {
            return false;
        }
        match &self.ids {
            IdFilter::All => true,
            IdFilter::Ids(ids) => ids.contains(&id),
        }
    }
}

/// One row of a query result. Columns that were not requested are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRow {
    pub id: i64,
    pub path: Option<String>,
    pub display_name: Option<String>,
    pub mime_type: Option<String>,
    pub date_taken: Option<i64>,
    pub date_modified: Option<i64>,
    pub size: Option<i64>,
    pub favourite: Option<bool>,
    pub trashed: Option<bool>,
}

impl MediaRow {
    pub fn id_only(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Keeps only the requested columns.
    pub fn project(&self, query: &MediaQuery) -> Self {
        let keep = |column| query.requests(column);
        Self {
            id: self.id,
            path: self.path.clone().filter(|_| keep(MediaColumn::Path)),
            display_name: self
                .display_name
                .clone()
                .filter(|_| keep(MediaColumn::DisplayName)),
            mime_type: self.mime_type.clone().filter(|_| keep(MediaColumn::MimeType)),
            date_taken: self.date_taken.filter(|_| keep(MediaColumn::DateTaken)),
            date_modified: self.date_modified.filter(|_| keep(MediaColumn::DateModified)),
            size: self.size.filter(|_| keep(MediaColumn::Size)),
            favourite: self.favourite.filter(|_| keep(MediaColumn::Favourite)),
            trashed: self.trashed.filter(|_| keep(MediaColumn::Trashed)),
        }
    }

    /// Applies column writes in order.
    pub fn apply(&mut self, values: &[ColumnValue]) {
        for value in values {
            match value {
                ColumnValue::Path(v) => self.path = Some(v.clone()),
                ColumnValue::DisplayName(v) => self.display_name = Some(v.clone()),
                ColumnValue::MimeType(v) => self.mime_type = Some(v.clone()),
                ColumnValue::DateTaken(v) => self.date_taken = Some(*v),
                ColumnValue::DateModified(v) => self.date_modified = Some(*v),
                ColumnValue::Size(v) => self.size = Some(*v),
                ColumnValue::Favourite(v) => self.favourite = Some(*v),
                ColumnValue::Trashed(v) => self.trashed = Some(*v),
            }
        }
    }
}

/// A single column write for `update` / `insert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnValue {
    Path(String),
    DisplayName(String),
    MimeType(String),
    DateTaken(i64),
    DateModified(i64),
    Size(i64),
    Favourite(bool),
    Trashed(bool),
}

/// The platform media registry.
///
/// # Cancellation
///
/// `query` receives the caller's [`CancellationToken`]. Implementations should
/// stop early and return `Ok(None)` once it fires; callers discard anything a
/// cancelled query returns.
///
/// # Platform Support
///
/// - **Android**: `ContentResolver` over `MediaStore.Files`
/// - **Desktop**: a directory walker for tests and tooling
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Runs a query. `Ok(None)` means the source returned no cursor.
    async fn query(
        &self,
        query: &MediaQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<MediaRow>>>;

    /// Writes columns on one row, returning the affected row count.
    async fn update(&self, id: i64, values: &[ColumnValue]) -> Result<u64>;

    /// Inserts a new row, returning its id when the source assigned one.
    async fn insert(&self, values: &[ColumnValue]) -> Result<Option<i64>>;

    /// Removes one row, returning the affected row count.
    async fn delete(&self, id: i64) -> Result<u64>;
}

/// Guess a mime type from the file extension. `None` for non-media files.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> MediaRow {
        MediaRow {
            id: 7,
            path: Some("/sdcard/DCIM/a.jpg".into()),
            display_name: Some("a.jpg".into()),
            mime_type: Some("image/jpeg".into()),
            date_taken: Some(10),
            date_modified: Some(20),
            size: Some(1024),
            favourite: Some(false),
            trashed: Some(false),
        }
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("/a/IMG_1.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("clip.mov")), Some("video/quicktime"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("0a1b2c")), None);
    }

    #[test]
    fn test_projection_drops_unrequested_columns() {
        let projected = sample_row().project(&MediaQuery::modification_stamps());
        assert_eq!(projected.id, 7);
        assert_eq!(projected.date_modified, Some(20));
        assert!(projected.path.is_none());
        assert!(projected.size.is_none());
    }

    #[test]
    fn test_query_filters_trashed_and_ids() {
        let query = MediaQuery::full_for(vec![1, 2]);
        assert!(query.matches(1, false));
        assert!(!query.matches(3, false));
        assert!(!query.matches(1, true));
        assert!(query.with_trashed(true).matches(1, true));
    }

    #[test]
    fn test_apply_column_values() {
        let mut row = sample_row();
        row.apply(&[ColumnValue::Favourite(true), ColumnValue::DateModified(99)]);
        assert_eq!(row.favourite, Some(true));
        assert_eq!(row.date_modified, Some(99));
    }
}
