//! Domain models for the local media index
//!
//! Rows map directly onto the tables created by `migrations/`. Identity of a
//! [`MediaRecord`] is the platform media store id, so no surrogate keys are
//! generated for media.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::LibraryError;

// =============================================================================
// Media
// =============================================================================

/// Image or video, derived from the mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Anything that is not `video/*` is treated as an image.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.trim().to_ascii_lowercase().starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// One row of the `media` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MediaRecord {
    pub id: i64,
    pub path: String,
    pub parent_path: String,
    pub display_name: String,
    pub mime_type: String,
    pub kind: MediaKind,
    /// Seconds since epoch
    pub date_taken: Option<i64>,
    /// Seconds since epoch
    pub date_modified: i64,
    pub size: i64,
    pub favourite: bool,
    pub remote_url: Option<String>,
    pub remote_thumbnail: Option<String>,
    pub content_hash: Option<String>,
    pub custom_album_id: Option<i64>,
}

impl MediaRecord {
    /// Build a record from the fields the media store always provides.
    ///
    /// `parent_path` and `kind` are derived; `display_name` falls back to the
    /// file name.
    pub fn new(id: i64, path: impl Into<String>, mime_type: impl Into<String>) -> Self {
        let path = path.into();
        let mime_type = mime_type.into();
        let display_name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            id,
            parent_path: parent_of(&path),
            display_name,
            kind: MediaKind::from_mime(&mime_type),
            path,
            mime_type,
            date_taken: None,
            date_modified: 0,
            size: 0,
            favourite: false,
            remote_url: None,
            remote_thumbnail: None,
            content_hash: None,
            custom_album_id: None,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.path.trim().is_empty() {
            return Err(format!("media {} has an empty path", self.id));
        }
        if self.size < 0 {
            return Err(format!("media {} has a negative size", self.id));
        }
        Ok(())
    }
}

/// Parent directory of an absolute path, or `""` for a bare file name.
pub fn parent_of(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Which media make up a logical album.
///
/// Folder albums are every record under one parent directory; custom albums
/// are the records assigned to a `custom_media` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlbumSelector {
    Folder(String),
    Custom(i64),
}

impl AlbumSelector {
    /// Stable key used as the local album id in persisted sync state.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AlbumSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlbumSelector::Folder(path) => write!(f, "folder:{}", path),
            AlbumSelector::Custom(id) => write!(f, "custom:{}", id),
        }
    }
}

impl FromStr for AlbumSelector {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("folder:") {
            return Ok(AlbumSelector::Folder(path.to_string()));
        }
        if let Some(id) = s.strip_prefix("custom:") {
            let id = id
                .parse()
                .map_err(|_| LibraryError::invalid("album", format!("bad custom id in {}", s)))?;
            return Ok(AlbumSelector::Custom(id));
        }
        Err(LibraryError::invalid(
            "album",
            format!("unknown album key: {}", s),
        ))
    }
}

// =============================================================================
// Tags and custom albums
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

/// A user-defined album (`custom_media` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CustomAlbum {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

// =============================================================================
// Secure folder and trash
// =============================================================================

/// Mapping between a media file's original location and its secured copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SecureMapping {
    pub original_path: String,
    pub secured_path: String,
    /// `None` for legacy items that were moved without encryption.
    pub iv: Option<Vec<u8>>,
    pub thumbnail_path: Option<String>,
    pub thumbnail_iv: Option<Vec<u8>>,
    pub mime_type: String,
    pub display_name: String,
    pub date_taken: Option<i64>,
    pub created_at: i64,
}

impl SecureMapping {
    pub fn is_encrypted(&self) -> bool {
        self.iv.as_ref().map(|iv| !iv.is_empty()).unwrap_or(false)
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.mime_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TrashedRecord {
    pub original_path: String,
    pub trashed_path: String,
    pub media_id: Option<i64>,
    pub date_taken: Option<i64>,
    pub mime_type: String,
    pub display_name: String,
    pub trashed_at: i64,
}

// =============================================================================
// Remote sync bookkeeping
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum SyncTaskStatus {
    Waiting,
    Processing,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum SyncTaskKind {
    Delete,
    Upload,
    Update,
}

impl fmt::Display for SyncTaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncTaskKind::Delete => "delete",
            SyncTaskKind::Upload => "upload",
            SyncTaskKind::Update => "update",
        };
        f.write_str(s)
    }
}

/// A pending change that must be propagated to the remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: i64,
    pub status: SyncTaskStatus,
    pub kind: SyncTaskKind,
    /// Local media ids (or device asset ids for deletes of vanished items).
    pub item_ids: Vec<String>,
    /// Local album key the task belongs to, if any.
    pub album_id: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub last_modified: i64,
}

#[derive(FromRow)]
pub(crate) struct SyncTaskRow {
    pub id: i64,
    pub status: SyncTaskStatus,
    pub kind: SyncTaskKind,
    pub item_ids: String,
    pub album_id: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub last_modified: i64,
}

impl TryFrom<SyncTaskRow> for SyncTask {
    type Error = LibraryError;

    fn try_from(row: SyncTaskRow) -> Result<Self, Self::Error> {
        Ok(SyncTask {
            id: row.id,
            status: row.status,
            kind: row.kind,
            item_ids: serde_json::from_str(&row.item_ids)?,
            album_id: row.album_id,
            attempts: row.attempts,
            last_error: row.last_error,
            last_modified: row.last_modified,
        })
    }
}

/// Counts of sync tasks by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTaskStats {
    pub waiting: u64,
    pub processing: u64,
    pub synced: u64,
}

impl SyncTaskStats {
    pub fn pending(&self) -> u64 {
        self.waiting + self.processing
    }
}

/// Persisted duplicate-suppression state for one local album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    /// Local album key (see [`AlbumSelector::key`])
    pub album_id: String,
    pub remote_album_id: Option<String>,
    /// Device asset ids already confirmed present remotely
    pub duplicates: Vec<String>,
    pub updated_at: i64,
}

#[derive(FromRow)]
pub(crate) struct DuplicateRow {
    pub album_id: String,
    pub remote_album_id: Option<String>,
    pub duplicates: String,
    pub updated_at: i64,
}

impl TryFrom<DuplicateRow> for DuplicateRecord {
    type Error = LibraryError;

    fn try_from(row: DuplicateRow) -> Result<Self, Self::Error> {
        Ok(DuplicateRecord {
            album_id: row.album_id,
            remote_album_id: row.remote_album_id,
            duplicates: serde_json::from_str(&row.duplicates)?,
            updated_at: row.updated_at,
        })
    }
}
