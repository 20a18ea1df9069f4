//! Encrypt-in-place for secure folder items stored before encryption existed
//!
//! A mapping without an iv points at plaintext, and so does a plain file in
//! the secure folder with no mapping at all; the latter gets a mapping first.
//! The migration backs the file up, writes an encrypted copy under a fresh
//! opaque name, swaps the mapping over and only then deletes the plaintext
//! and the backup. A failed item keeps its backup and stays "not migrated"
//! for the next run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::{Clock, SystemClock};
use bytes::Bytes;
use core_library::models::{MediaKind, SecureMapping};
use core_library::repositories::SecureMappingRepository;
use core_runtime::events::{CoreEvent, EventBus, VaultEvent};
use tracing::{info, instrument, warn};

use crate::cipher::VaultCipher;
use crate::error::{Result, VaultError};
use crate::report::BatchReport;
use crate::secure_folder::{
    adopted_mapping, available_path, path_string, remove_quietly, unmapped_files,
    write_sealed_thumbnail, VaultLayout,
};

/// Snapshot of how much of the secure folder is encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    pub encrypted: u64,
    pub legacy: u64,
}

impl MigrationStatus {
    pub fn needs_migration(&self) -> bool {
        self.legacy > 0
    }
}

pub struct LegacyVaultMigration {
    mappings: Arc<dyn SecureMappingRepository>,
    fs: Arc<dyn FileSystemAccess>,
    cipher: VaultCipher,
    layout: VaultLayout,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl LegacyVaultMigration {
    pub fn new(
        mappings: Arc<dyn SecureMappingRepository>,
        fs: Arc<dyn FileSystemAccess>,
        cipher: VaultCipher,
        layout: VaultLayout,
        event_bus: EventBus,
    ) -> Self {
        Self {
            mappings,
            fs,
            cipher,
            layout,
            event_bus,
            clock: Arc::new(SystemClock),
        }
    }

    /// Time source for mappings created for unmapped files.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn detect(&self) -> Result<MigrationStatus> {
        let total = self.mappings.count().await? as u64;
        let unencrypted = self.mappings.list_unencrypted().await?.len() as u64;
        let unmapped = self.unmapped().await?.len() as u64;
        Ok(MigrationStatus {
            encrypted: total.saturating_sub(unencrypted),
            legacy: unencrypted + unmapped,
        })
    }

    async fn unmapped(&self) -> Result<Vec<PathBuf>> {
        unmapped_files(
            self.fs.as_ref(),
            self.mappings.as_ref(),
            &self.layout.secure_dir,
        )
        .await
    }

    /// Encrypt every legacy item. Safe to run repeatedly.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<BatchReport<SecureMapping>> {
        let mut report = BatchReport::default();
        let mut legacy = self.mappings.list_unencrypted().await?;
        for path in self.unmapped().await? {
            let mapping =
                adopted_mapping(self.fs.as_ref(), &path, self.clock.unix_timestamp()).await;
            match self.mappings.record_secured(&mapping, None).await {
                Ok(()) => legacy.push(mapping),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to map secure file");
                    report.record_failure(path.display(), e);
                }
            }
        }
        if legacy.is_empty() {
            return Ok(report);
        }

        self.fs.create_dir_all(&self.layout.backup_dir()).await?;
        self.fs.create_dir_all(&self.layout.thumbs_dir()).await?;

        for mapping in legacy {
            let original = mapping.original_path.clone();
            match self.migrate_one(mapping).await {
                Ok(migrated) => report.succeeded(migrated),
                Err(e) => {
                    warn!(path = %original, error = %e, "Failed to migrate secure item");
                    report.record_failure(original, e);
                }
            }
        }

        info!(
            migrated = report.completed_count(),
            failed = report.failed_count(),
            "Secure folder migration finished"
        );
        self.event_bus
            .emit(CoreEvent::Vault(VaultEvent::MigrationCompleted {
                migrated: report.completed_count(),
                failed: report.failed_count(),
            }))
            .ok();

        Ok(report)
    }

    async fn migrate_one(&self, mut mapping: SecureMapping) -> Result<SecureMapping> {
        let legacy_path = Path::new(&mapping.secured_path).to_path_buf();
        let plaintext = self.fs.read_file(&legacy_path).await?;

        let backup_name = legacy_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| mapping.display_name.clone());
        let backup =
            available_path(self.fs.as_ref(), &self.layout.backup_dir(), &backup_name).await?;
        self.fs.write_file(&backup, plaintext.clone()).await?;

        let sealed = self.cipher.seal(&plaintext)?;
        let (secured_path, thumb_path) = self.layout.allocate();
        self.fs
            .write_file(&secured_path, Bytes::from(sealed.ciphertext))
            .await?;

        let previous_thumb = mapping.thumbnail_path.take();
        let thumbnail = if mapping.kind() == MediaKind::Image {
            write_sealed_thumbnail(self.fs.as_ref(), &self.cipher, plaintext, &thumb_path).await
        } else {
            None
        };

        mapping.secured_path = path_string(&secured_path);
        mapping.iv = Some(sealed.iv);
        mapping.thumbnail_path = thumbnail.as_ref().map(|_| path_string(&thumb_path));
        mapping.thumbnail_iv = thumbnail.map(|t| t.iv);

        let updated = match self.mappings.update_encryption(&mapping).await {
            Ok(updated) => updated,
            Err(e) => {
                self.discard(&secured_path, mapping.thumbnail_path.as_deref()).await;
                return Err(e.into());
            }
        };
        if !updated {
            self.discard(&secured_path, mapping.thumbnail_path.as_deref()).await;
            return Err(VaultError::NotFound(mapping.original_path));
        }

        remove_quietly(self.fs.as_ref(), &legacy_path).await;
        if let Some(old) = previous_thumb {
            remove_quietly(self.fs.as_ref(), Path::new(&old)).await;
        }
        remove_quietly(self.fs.as_ref(), &backup).await;

        Ok(mapping)
    }

    async fn discard(&self, secured: &Path, thumb: Option<&str>) {
        remove_quietly(self.fs.as_ref(), secured).await;
        if let Some(thumb) = thumb {
            remove_quietly(self.fs.as_ref(), Path::new(thumb)).await;
        }
    }
}
