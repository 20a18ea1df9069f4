//! # Secure Folder & Trash
//!
//! Moves media between the shared media index and app-private storage.
//!
//! ## Overview
//!
//! - [`SecureFolderManager`]: encrypt into / decrypt out of the secure folder,
//!   list secured media in memory, purge
//! - [`LegacyVaultMigration`]: encrypt-in-place for items stored before
//!   encryption, with backups
//! - [`TrashBin`]: trash, restore, empty
//! - [`VaultKey`] / [`VaultCipher`]: AES-256-GCM with a master key kept in the
//!   host `SecureStore` and a fresh iv per file
//!
//! Batches never fail as a whole because of one item; each operation returns
//! a [`BatchReport`] listing the items that went through and the ones that
//! did not.

pub mod cipher;
pub mod error;
pub mod migration;
pub mod report;
pub mod secure_folder;
pub mod thumbnail;
pub mod trash;

pub use cipher::{VaultCipher, VaultKey, MASTER_KEY_NAME};
pub use error::{Result, VaultError};
pub use migration::{LegacyVaultMigration, MigrationStatus};
pub use report::{BatchReport, ItemFailure};
pub use secure_folder::{
    RestoredItem, SecureFolderManager, SecureItemState, SecureMedia, VaultLayout,
};
pub use trash::TrashBin;
