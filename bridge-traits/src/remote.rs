//! Remote Photo Server
//!
//! Contract for the self-hosted backup server the remote sync engine mirrors
//! albums into. All calls degrade to a typed [`BridgeError`](crate::BridgeError).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Authenticated session returned by `login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user_id: String,
    pub user_email: String,
}

/// An asset as seen inside a remote album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub id: String,
    /// Identity assigned by the uploading device.
    pub device_asset_id: String,
    pub original_file_name: String,
    pub checksum: Option<String>,
}

/// A remote album. `assets` is only populated by `get_album`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAlbum {
    pub id: String,
    pub name: String,
    pub asset_count: u64,
    pub thumbnail_asset_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub assets: Vec<RemoteAsset>,
}

impl RemoteAlbum {
    pub fn device_asset_ids(&self) -> impl Iterator<Item = &str> {
        self.assets.iter().map(|a| a.device_asset_id.as_str())
    }
}

/// Partial album update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumUpdate {
    pub name: Option<String>,
    pub thumbnail_asset_id: Option<String>,
}

/// One multipart asset upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub device_asset_id: String,
    pub device_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
    pub file_created_at: DateTime<Utc>,
    pub file_modified_at: DateTime<Utc>,
    pub is_favorite: bool,
}

/// Result of an upload. The server may report the asset already existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedAsset {
    pub id: String,
    pub duplicate: bool,
}

/// Remote photo server.
///
/// Authentication is a bearer token obtained from [`login`](Self::login);
/// implementations keep it and attach it to every subsequent call.
#[async_trait]
pub trait PhotoServer: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<Session>;

    /// Album summaries without asset lists.
    async fn list_albums(&self) -> Result<Vec<RemoteAlbum>>;

    /// One album including its current asset list.
    async fn get_album(&self, album_id: &str) -> Result<RemoteAlbum>;

    async fn create_album(&self, name: &str, asset_ids: &[String]) -> Result<RemoteAlbum>;

    async fn update_album(&self, album_id: &str, update: &AlbumUpdate) -> Result<RemoteAlbum>;

    async fn delete_album(&self, album_id: &str) -> Result<()>;

    async fn upload_asset(&self, request: UploadRequest) -> Result<UploadedAsset>;

    /// Returns the ids the server accepted.
    async fn add_assets_to_album(&self, album_id: &str, asset_ids: &[String])
        -> Result<Vec<String>>;

    async fn remove_assets_from_album(&self, album_id: &str, asset_ids: &[String])
        -> Result<()>;

    async fn delete_assets(&self, asset_ids: &[String]) -> Result<()>;
}
