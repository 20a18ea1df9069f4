//! # Secure Folder Manager
//!
//! Moves media out of the shared index into an app-private encrypted store
//! and back again.
//!
//! ## Layout
//!
//! ```text
//! <secure_dir>/<opaque id>          AES-256-GCM ciphertext of the original
//! <secure_dir>/thumbs/<opaque id>   ciphertext of a JPEG preview (images only)
//! <secure_dir>/backup/<file name>   plaintext backups kept during migration
//! ```
//!
//! Every moved item has one `secureditementity` row mapping its original path
//! to the opaque secured path together with the ivs. Items are processed one
//! at a time; a failure on one item is reported and leaves every other
//! mapping untouched.
//!
//! Plain files in `<secure_dir>` with no row at all predate the mapping table.
//! They are listed as not migrated and picked up by the migration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::media_source::{mime_for_path, ColumnValue, MediaSource};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::{Clock, SystemClock};
use bytes::Bytes;
use core_library::models::{MediaKind, MediaRecord, SecureMapping};
use core_library::repositories::{MediaRepository, SecureMappingRepository};
use core_runtime::events::{CoreEvent, EventBus, VaultEvent};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cipher::{Sealed, VaultCipher};
use crate::error::{Result, VaultError};
use crate::report::BatchReport;
use crate::thumbnail::render_thumbnail_blocking;

/// Directories the vault writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    pub secure_dir: PathBuf,
    pub restore_dir: PathBuf,
}

impl VaultLayout {
    pub fn new(secure_dir: impl Into<PathBuf>, restore_dir: impl Into<PathBuf>) -> Self {
        Self {
            secure_dir: secure_dir.into(),
            restore_dir: restore_dir.into(),
        }
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.secure_dir.join("thumbs")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.secure_dir.join("backup")
    }

    /// A fresh opaque location for a secured file and its thumbnail.
    pub(crate) fn allocate(&self) -> (PathBuf, PathBuf) {
        let name = Uuid::new_v4().simple().to_string();
        (self.secure_dir.join(&name), self.thumbs_dir().join(name))
    }
}

/// Whether a secured file holds ciphertext yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureItemState {
    Encrypted,
    /// Legacy plaintext awaiting the encrypt-in-place migration.
    NotMigrated,
}

/// A secured item with its decrypted content. Held in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct SecureMedia {
    pub original_path: String,
    pub secured_path: String,
    pub display_name: String,
    pub mime_type: String,
    pub kind: MediaKind,
    pub date_taken: Option<i64>,
    pub state: SecureItemState,
    pub data: Bytes,
    pub thumbnail: Option<Bytes>,
}

impl std::fmt::Debug for SecureMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureMedia")
            .field("original_path", &self.original_path)
            .field("secured_path", &self.secured_path)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("data_len", &self.data.len())
            .field("has_thumbnail", &self.thumbnail.is_some())
            .finish()
    }
}

/// Where a restored item ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredItem {
    pub original_path: String,
    pub restored_path: String,
    /// Id the media source assigned on re-registration.
    pub media_id: Option<i64>,
}

pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Pick `dir/name`, or `dir/stem (n).ext` when that already exists.
pub(crate) async fn available_path(
    fs: &dyn FileSystemAccess,
    dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    let candidate = dir.join(name);
    if !fs.exists(&candidate).await? {
        return Ok(candidate);
    }

    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
        if !fs.exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Encrypt an image preview, writing it to `thumb_path`.
///
/// Thumbnails are best effort: a decode failure only costs the preview.
pub(crate) async fn write_sealed_thumbnail(
    fs: &dyn FileSystemAccess,
    cipher: &VaultCipher,
    data: Bytes,
    thumb_path: &Path,
) -> Option<Sealed> {
    let preview = match render_thumbnail_blocking(data).await {
        Ok(preview) => preview,
        Err(e) => {
            debug!(path = %thumb_path.display(), error = %e, "Skipping thumbnail");
            return None;
        }
    };
    let sealed = match cipher.seal(&preview) {
        Ok(sealed) => sealed,
        Err(e) => {
            warn!(error = %e, "Failed to encrypt thumbnail");
            return None;
        }
    };
    match fs
        .write_file(thumb_path, Bytes::from(sealed.ciphertext.clone()))
        .await
    {
        Ok(()) => Some(sealed),
        Err(e) => {
            warn!(path = %thumb_path.display(), error = %e, "Failed to write thumbnail");
            None
        }
    }
}

/// Plain files in the secure folder that no mapping points at.
pub(crate) async fn unmapped_files(
    fs: &dyn FileSystemAccess,
    mappings: &dyn SecureMappingRepository,
    secure_dir: &Path,
) -> Result<Vec<PathBuf>> {
    if !fs.exists(secure_dir).await? {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for path in fs.list_directory(secure_dir).await? {
        if mappings
            .find_by_secured_path(&path_string(&path))
            .await?
            .is_some()
        {
            continue;
        }
        if !fs.metadata(&path).await?.is_directory {
            files.push(path);
        }
    }
    Ok(files)
}

/// Plaintext mapping for an unmapped file, keyed by its own location.
pub(crate) async fn adopted_mapping(
    fs: &dyn FileSystemAccess,
    path: &Path,
    created_at: i64,
) -> SecureMapping {
    let modified_at = fs.metadata(path).await.ok().and_then(|m| m.modified_at);
    SecureMapping {
        original_path: path_string(path),
        secured_path: path_string(path),
        iv: None,
        thumbnail_path: None,
        thumbnail_iv: None,
        mime_type: mime_for_path(path)
            .unwrap_or("application/octet-stream")
            .to_string(),
        display_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_string(path)),
        date_taken: modified_at,
        created_at,
    }
}

pub(crate) async fn remove_quietly(fs: &dyn FileSystemAccess, path: &Path) {
    if let Err(e) = fs.delete_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove file");
    }
}

/// Secure folder operations.
pub struct SecureFolderManager {
    media: Arc<dyn MediaRepository>,
    mappings: Arc<dyn SecureMappingRepository>,
    source: Arc<dyn MediaSource>,
    fs: Arc<dyn FileSystemAccess>,
    cipher: VaultCipher,
    layout: VaultLayout,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl SecureFolderManager {
    pub fn new(
        media: Arc<dyn MediaRepository>,
        mappings: Arc<dyn SecureMappingRepository>,
        source: Arc<dyn MediaSource>,
        fs: Arc<dyn FileSystemAccess>,
        cipher: VaultCipher,
        layout: VaultLayout,
        event_bus: EventBus,
    ) -> Self {
        Self {
            media,
            mappings,
            source,
            fs,
            cipher,
            layout,
            event_bus,
            clock: Arc::new(SystemClock),
        }
    }

    /// Time source for mapping and restore stamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    async fn ensure_dirs(&self) -> Result<()> {
        self.fs.create_dir_all(&self.layout.secure_dir).await?;
        self.fs.create_dir_all(&self.layout.thumbs_dir()).await?;
        Ok(())
    }

    /// Encrypt the given media into the secure folder.
    ///
    /// Per item: encrypt, write ciphertext and thumbnail, persist the mapping
    /// (dropping the index row in the same transaction), then delete the
    /// plaintext original and its media source entry.
    #[instrument(skip(self, media_ids), fields(count = media_ids.len()))]
    pub async fn move_to_secure(&self, media_ids: &[i64]) -> Result<BatchReport<SecureMapping>> {
        self.ensure_dirs().await?;
        let mut report = BatchReport::default();

        for &id in media_ids {
            match self.secure_one(id).await {
                Ok(mapping) => report.succeeded(mapping),
                Err(e) => {
                    warn!(media_id = id, error = %e, "Failed to secure item");
                    report.record_failure(id, e);
                }
            }
        }

        info!(
            secured = report.completed_count(),
            failed = report.failed_count(),
            "Moved items to secure folder"
        );
        self.event_bus
            .emit(CoreEvent::Vault(VaultEvent::ItemsSecured {
                secured: report.completed_count(),
                failed: report.failed_count(),
            }))
            .ok();

        Ok(report)
    }

    async fn secure_one(&self, media_id: i64) -> Result<SecureMapping> {
        let record: MediaRecord = self
            .media
            .find_by_id(media_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("media {}", media_id)))?;

        if self
            .mappings
            .find_by_original_path(&record.path)
            .await?
            .is_some()
        {
            return Err(VaultError::Encryption(format!(
                "{} is already in the secure folder",
                record.path
            )));
        }

        let original = PathBuf::from(&record.path);
        let data = self.fs.read_file(&original).await?;
        let sealed = self.cipher.seal(&data)?;

        let (secured_path, thumb_path) = self.layout.allocate();
        self.fs
            .write_file(&secured_path, Bytes::from(sealed.ciphertext))
            .await?;

        let thumbnail = if record.kind == MediaKind::Image {
            write_sealed_thumbnail(self.fs.as_ref(), &self.cipher, data, &thumb_path).await
        } else {
            None
        };

        let mapping = SecureMapping {
            original_path: record.path.clone(),
            secured_path: path_string(&secured_path),
            iv: Some(sealed.iv),
            thumbnail_path: thumbnail.as_ref().map(|_| path_string(&thumb_path)),
            thumbnail_iv: thumbnail.map(|t| t.iv),
            mime_type: record.mime_type.clone(),
            display_name: record.display_name.clone(),
            date_taken: record.date_taken,
            created_at: self.clock.unix_timestamp(),
        };

        if let Err(e) = self.mappings.record_secured(&mapping, Some(media_id)).await {
            remove_quietly(self.fs.as_ref(), &secured_path).await;
            if mapping.thumbnail_path.is_some() {
                remove_quietly(self.fs.as_ref(), &thumb_path).await;
            }
            return Err(e.into());
        }

        remove_quietly(self.fs.as_ref(), &original).await;
        if let Err(e) = self.source.delete(media_id).await {
            warn!(media_id, error = %e, "Failed to remove media source entry");
        }

        debug!(media_id, secured = %mapping.secured_path, "Secured item");
        Ok(mapping)
    }

    /// Decrypt items back into the restore directory and drop their mappings.
    #[instrument(skip(self, original_paths), fields(count = original_paths.len()))]
    pub async fn restore_from_secure(
        &self,
        original_paths: &[String],
    ) -> Result<BatchReport<RestoredItem>> {
        self.fs.create_dir_all(&self.layout.restore_dir).await?;
        let mut report = BatchReport::default();

        for original in original_paths {
            match self.restore_one(original).await {
                Ok(item) => report.succeeded(item),
                Err(e) => {
                    warn!(path = %original, error = %e, "Failed to restore item");
                    report.record_failure(original, e);
                }
            }
        }

        info!(
            restored = report.completed_count(),
            failed = report.failed_count(),
            "Restored items from secure folder"
        );
        self.event_bus
            .emit(CoreEvent::Vault(VaultEvent::ItemsRestored {
                restored: report.completed_count(),
                failed: report.failed_count(),
            }))
            .ok();

        Ok(report)
    }

    async fn restore_one(&self, original_path: &str) -> Result<RestoredItem> {
        let mapping = self
            .mappings
            .find_by_original_path(original_path)
            .await?
            .ok_or_else(|| VaultError::NotFound(original_path.to_string()))?;

        let plaintext = self.read_plaintext(&mapping).await?;
        let size = plaintext.len() as i64;

        let target =
            available_path(self.fs.as_ref(), &self.layout.restore_dir, &mapping.display_name)
                .await?;
        self.fs.write_file(&target, plaintext).await?;
        let restored_path = path_string(&target);

        let mut values = vec![
            ColumnValue::Path(restored_path.clone()),
            ColumnValue::DisplayName(mapping.display_name.clone()),
            ColumnValue::MimeType(mapping.mime_type.clone()),
            ColumnValue::DateModified(self.clock.unix_timestamp()),
            ColumnValue::Size(size),
        ];
        if let Some(taken) = mapping.date_taken {
            values.push(ColumnValue::DateTaken(taken));
        }
        let media_id = match self.source.insert(&values).await {
            Ok(id) => id,
            Err(e) => {
                warn!(path = %restored_path, error = %e, "Failed to register restored file");
                None
            }
        };

        self.mappings.remove(original_path).await?;
        self.remove_secured_files(&mapping).await;

        debug!(original = %original_path, restored = %restored_path, "Restored item");
        Ok(RestoredItem {
            original_path: original_path.to_string(),
            restored_path,
            media_id,
        })
    }

    /// Missing iv means the item predates encryption; its bytes are plaintext.
    async fn read_plaintext(&self, mapping: &SecureMapping) -> Result<Bytes> {
        let stored = self.fs.read_file(Path::new(&mapping.secured_path)).await?;
        match &mapping.iv {
            Some(iv) if !iv.is_empty() => Ok(Bytes::from(self.cipher.open(&stored, iv)?)),
            _ => Ok(stored),
        }
    }

    async fn read_thumbnail(&self, mapping: &SecureMapping) -> Option<Bytes> {
        let (path, iv) = match (&mapping.thumbnail_path, &mapping.thumbnail_iv) {
            (Some(path), Some(iv)) => (path, iv),
            _ => return None,
        };
        let stored = self.fs.read_file(Path::new(path)).await.ok()?;
        match self.cipher.open(&stored, iv) {
            Ok(plain) => Some(Bytes::from(plain)),
            Err(e) => {
                warn!(path = %path, error = %e, "Unreadable thumbnail");
                None
            }
        }
    }

    async fn remove_secured_files(&self, mapping: &SecureMapping) {
        remove_quietly(self.fs.as_ref(), Path::new(&mapping.secured_path)).await;
        if let Some(thumb) = &mapping.thumbnail_path {
            remove_quietly(self.fs.as_ref(), Path::new(thumb)).await;
        }
    }

    /// Every file in the secure store, decrypted in memory.
    ///
    /// Mappings without an iv and plain files without any mapping are
    /// surfaced as [`SecureItemState::NotMigrated`].
    #[instrument(skip(self))]
    pub async fn list_secure_media(&self) -> Result<Vec<SecureMedia>> {
        if !self.fs.exists(&self.layout.secure_dir).await? {
            return Ok(Vec::new());
        }

        let files = self.fs.list_directory(&self.layout.secure_dir).await?;
        let mut items = Vec::with_capacity(files.len());

        for file in files {
            let secured_path = path_string(&file);
            let mapping = match self.mappings.find_by_secured_path(&secured_path).await? {
                Some(mapping) => mapping,
                None => {
                    if self.fs.metadata(&file).await?.is_directory {
                        continue;
                    }
                    debug!(path = %secured_path, "Unmapped plaintext in secure folder");
                    adopted_mapping(self.fs.as_ref(), &file, self.clock.unix_timestamp()).await
                }
            };

            let state = if mapping.is_encrypted() {
                SecureItemState::Encrypted
            } else {
                SecureItemState::NotMigrated
            };
            let data = match self.read_plaintext(&mapping).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %secured_path, error = %e, "Unreadable secure file");
                    continue;
                }
            };
            let thumbnail = self.read_thumbnail(&mapping).await;

            items.push(SecureMedia {
                kind: mapping.kind(),
                original_path: mapping.original_path,
                secured_path: mapping.secured_path,
                display_name: mapping.display_name,
                mime_type: mapping.mime_type,
                date_taken: mapping.date_taken,
                state,
                data,
                thumbnail,
            });
        }

        items.sort_by(|a, b| {
            b.date_taken
                .cmp(&a.date_taken)
                .then_with(|| a.original_path.cmp(&b.original_path))
        });
        Ok(items)
    }

    /// Permanently delete secured items and their mappings.
    #[instrument(skip(self, original_paths), fields(count = original_paths.len()))]
    pub async fn purge(&self, original_paths: &[String]) -> Result<BatchReport<String>> {
        let mut report = BatchReport::default();

        for original in original_paths {
            let mapping = match self.mappings.find_by_original_path(original).await {
                Ok(Some(mapping)) => mapping,
                Ok(None) => {
                    report.record_failure(original, VaultError::NotFound(original.clone()));
                    continue;
                }
                Err(e) => {
                    report.record_failure(original, e);
                    continue;
                }
            };

            match self.mappings.remove(original).await {
                Ok(_) => {
                    self.remove_secured_files(&mapping).await;
                    report.succeeded(original.clone());
                }
                Err(e) => report.record_failure(original, e),
            }
        }

        self.event_bus
            .emit(CoreEvent::Vault(VaultEvent::ItemsPurged {
                purged: report.completed_count(),
            }))
            .ok();

        Ok(report)
    }

    pub async fn secured_count(&self) -> Result<i64> {
        Ok(self.mappings.count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use tempfile::TempDir;

    #[core_async::test]
    async fn test_available_path_appends_counter() {
        let dir = TempDir::new().unwrap();
        let fs = TokioFileSystem::new(dir.path());

        let first = available_path(&fs, dir.path(), "a.jpg").await.unwrap();
        assert_eq!(first, dir.path().join("a.jpg"));

        fs.write_file(&first, Bytes::from_static(b"x")).await.unwrap();
        let second = available_path(&fs, dir.path(), "a.jpg").await.unwrap();
        assert_eq!(second, dir.path().join("a (1).jpg"));

        fs.write_file(&second, Bytes::from_static(b"x")).await.unwrap();
        let third = available_path(&fs, dir.path(), "a.jpg").await.unwrap();
        assert_eq!(third, dir.path().join("a (2).jpg"));
    }

    #[test]
    fn test_allocated_paths_are_opaque_and_paired() {
        let layout = VaultLayout::new("/vault", "/restored");
        let (file, thumb) = layout.allocate();
        assert_eq!(file.parent().unwrap(), Path::new("/vault"));
        assert_eq!(thumb.parent().unwrap(), Path::new("/vault/thumbs"));
        assert_eq!(file.file_name(), thumb.file_name());
        assert_eq!(file.file_name().unwrap().len(), 32);
    }
}
