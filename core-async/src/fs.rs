//! Async filesystem helpers.
//!
//! Thin re-export of Tokio's `fs` module. File encryption in the secure folder
//! and trash moves go through these calls so they never block a worker.

pub use tokio::fs::{
    copy, create_dir_all, metadata, read, read_dir, remove_dir_all, remove_file, rename, write,
    DirEntry, File, OpenOptions,
};

/// Returns `true` when `path` exists, treating lookup errors as absence.
pub async fn exists(path: impl AsRef<std::path::Path>) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
