//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for the local media index.
//!
//! ## Architecture
//!
//! - Traits define the interface for each table group
//! - SQLite implementations use sqlx for async database access
//! - Cross-table writes (media removal, trash, secure moves) run in one
//!   explicit transaction and delete dependent rows before their parent
//!
//! ## Available Repositories
//!
//! - `MediaRepository` - media rows, favourites, album listings
//! - `TagRepository` - tags and `tagged_items`
//! - `CustomAlbumRepository` - user albums (`custom_media`)
//! - `TrashRepository` - trash bin records
//! - `SecureMappingRepository` - secure folder path mapping
//! - `SyncTaskRepository` - pending remote changes
//! - `DuplicateRepository` - per-album remote duplicate state

pub mod custom_album;
pub mod duplicate;
pub mod media;
pub mod pagination;
pub mod secure_mapping;
pub mod sync_task;
pub mod tag;
pub mod trash;

pub use custom_album::{CustomAlbumRepository, SqliteCustomAlbumRepository};
pub use duplicate::{DuplicateRepository, SqliteDuplicateRepository};
pub use media::{MediaRepository, SqliteMediaRepository};
pub use pagination::{Page, PageRequest};
pub use secure_mapping::{SecureMappingRepository, SqliteSecureMappingRepository};
pub use sync_task::{SqliteSyncTaskRepository, SyncTaskRepository};
pub use tag::{SqliteTagRepository, TagRepository};
pub use trash::{SqliteTrashRepository, TrashRepository};
