//! Remote album sync state
//!
//! Closed sets of variants the UI renders from. Every variant is handled
//! exhaustively by callers; none of them carries an ambiguous "unknown".

use std::collections::BTreeSet;

use bridge_traits::remote::RemoteAlbum;
use core_library::models::{DuplicateRecord, MediaRecord};
use serde::{Deserialize, Serialize};

/// Identity of a local file on the remote server.
///
/// Two distinct files sharing both name and byte size map to the same id;
/// that collision is accepted.
pub fn device_asset_id(display_name: &str, size: i64) -> String {
    format!("{}-{}", display_name, size)
}

pub fn device_asset_id_for(record: &MediaRecord) -> String {
    device_asset_id(&record.display_name, record.size)
}

/// Result of comparing a local album against a fresh remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDifference {
    InSync,
    OutOfSync {
        missing: BTreeSet<String>,
        extra: BTreeSet<String>,
    },
    Error(String),
}

impl SyncDifference {
    /// `missing = expected - remote`, `extra = remote - expected`.
    pub fn between(expected: &BTreeSet<String>, remote: &BTreeSet<String>) -> Self {
        let missing: BTreeSet<String> = expected.difference(remote).cloned().collect();
        let extra: BTreeSet<String> = remote.difference(expected).cloned().collect();
        if missing.is_empty() && extra.is_empty() {
            SyncDifference::InSync
        } else {
            SyncDifference::OutOfSync { missing, extra }
        }
    }

    pub fn missing(&self) -> Option<&BTreeSet<String>> {
        match self {
            SyncDifference::OutOfSync { missing, .. } => Some(missing),
            _ => None,
        }
    }
}

/// Sync status of one local album.
///
/// `Loading -> {InSync | OutOfSync | Error} -> Syncing -> ...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlbumSyncState {
    Loading,
    InSync,
    OutOfSync { missing: usize, extra: usize },
    /// Only observed while an upload for the album is running.
    Syncing { uploaded: u64, total: u64 },
    Error(String),
}

impl AlbumSyncState {
    pub fn label(&self) -> &'static str {
        match self {
            AlbumSyncState::Loading => "loading",
            AlbumSyncState::InSync => "in_sync",
            AlbumSyncState::OutOfSync { .. } => "out_of_sync",
            AlbumSyncState::Syncing { .. } => "syncing",
            AlbumSyncState::Error(_) => "error",
        }
    }
}

impl From<&SyncDifference> for AlbumSyncState {
    fn from(difference: &SyncDifference) -> Self {
        match difference {
            SyncDifference::InSync => AlbumSyncState::InSync,
            SyncDifference::OutOfSync { missing, extra } => AlbumSyncState::OutOfSync {
                missing: missing.len(),
                extra: extra.len(),
            },
            SyncDifference::Error(message) => AlbumSyncState::Error(message.clone()),
        }
    }
}

/// Remote album list as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlbumsState {
    Loading,
    Loaded(Vec<RemoteAlbum>),
    Error(String),
}

/// Device asset ids the server already reported as present for an album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateState {
    DupeFree,
    HasDupes(BTreeSet<String>),
}

impl DuplicateState {
    pub fn from_ids<I: IntoIterator<Item = String>>(ids: I) -> Self {
        let ids: BTreeSet<String> = ids.into_iter().collect();
        if ids.is_empty() {
            DuplicateState::DupeFree
        } else {
            DuplicateState::HasDupes(ids)
        }
    }

    pub fn from_record(record: &DuplicateRecord) -> Self {
        Self::from_ids(record.duplicates.iter().cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            DuplicateState::DupeFree => false,
            DuplicateState::HasDupes(ids) => ids.contains(id),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DuplicateState::DupeFree => 0,
            DuplicateState::HasDupes(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, id: String) {
        match self {
            DuplicateState::DupeFree => {
                *self = DuplicateState::HasDupes(BTreeSet::from([id]));
            }
            DuplicateState::HasDupes(ids) => {
                ids.insert(id);
            }
        }
    }

    /// Drop remembered ids that no longer exist locally. Returns how many
    /// were removed.
    pub fn prune(&mut self, local: &BTreeSet<String>) -> usize {
        let DuplicateState::HasDupes(ids) = self else {
            return 0;
        };
        let before = ids.len();
        ids.retain(|id| local.contains(id));
        let removed = before - ids.len();
        if ids.is_empty() {
            *self = DuplicateState::DupeFree;
        }
        removed
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            DuplicateState::DupeFree => Vec::new(),
            DuplicateState::HasDupes(ids) => ids.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_device_asset_id_is_name_and_size() {
        assert_eq!(device_asset_id("IMG_1.jpg", 2048), "IMG_1.jpg-2048");
        assert_eq!(
            device_asset_id("IMG_1.jpg", 2048),
            device_asset_id("IMG_1.jpg", 2048)
        );
        assert_ne!(
            device_asset_id("IMG_1.jpg", 2048),
            device_asset_id("IMG_1.jpg", 2049)
        );
        assert_ne!(
            device_asset_id("IMG_1.jpg", 2048),
            device_asset_id("IMG_2.jpg", 2048)
        );
    }

    #[test]
    fn test_difference_sets() {
        let diff = SyncDifference::between(&set(&["x", "y"]), &set(&["y", "z"]));
        assert_eq!(
            diff,
            SyncDifference::OutOfSync {
                missing: set(&["x"]),
                extra: set(&["z"]),
            }
        );
        assert_eq!(
            SyncDifference::between(&set(&["a"]), &set(&["a"])),
            SyncDifference::InSync
        );
        assert_eq!(
            SyncDifference::between(&set(&[]), &set(&[])),
            SyncDifference::InSync
        );
    }

    #[test]
    fn test_state_from_difference() {
        let diff = SyncDifference::between(&set(&["a", "b"]), &set(&["c"]));
        assert_eq!(
            AlbumSyncState::from(&diff),
            AlbumSyncState::OutOfSync { missing: 2, extra: 1 }
        );
        let error = AlbumSyncState::from(&SyncDifference::Error("boom".into()));
        assert_eq!(error.label(), "error");
    }

    #[test]
    fn test_duplicate_state_prune() {
        let mut state = DuplicateState::from_ids(vec!["a-1".to_string(), "b-2".to_string()]);
        assert!(state.contains("a-1"));

        assert_eq!(state.prune(&set(&["b-2", "c-3"])), 1);
        assert_eq!(state, DuplicateState::HasDupes(set(&["b-2"])));

        assert_eq!(state.prune(&set(&[])), 1);
        assert_eq!(state, DuplicateState::DupeFree);

        state.insert("d-4".into());
        assert_eq!(state.to_vec(), vec!["d-4".to_string()]);
    }
}
