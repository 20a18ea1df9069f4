//! # Local Media Index
//!
//! Owns the app-local SQLite cache of media metadata and the bookkeeping
//! tables used by the secure folder, trash bin and remote sync.
//!
//! ## Overview
//!
//! - SQLite pool with WAL, foreign keys and embedded migrations ([`db`])
//! - Row models ([`models`])
//! - Repository traits with SQLite implementations ([`repositories`])
//!
//! Relationships are enforced by foreign keys without cascades; every
//! repository that removes a parent row deletes its dependents first inside
//! the same transaction.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{
    AlbumSelector, CustomAlbum, DuplicateRecord, MediaKind, MediaRecord, SecureMapping, SyncTask,
    SyncTaskKind, SyncTaskStats, SyncTaskStatus, Tag, TrashedRecord,
};
pub use repositories::{
    CustomAlbumRepository, DuplicateRepository, MediaRepository, Page, PageRequest,
    SecureMappingRepository, SqliteCustomAlbumRepository, SqliteDuplicateRepository,
    SqliteMediaRepository, SqliteSecureMappingRepository, SqliteSyncTaskRepository,
    SqliteTagRepository, SqliteTrashRepository, SyncTaskRepository, TagRepository,
    TrashRepository,
};
