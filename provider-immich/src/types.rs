//! Immich API request and response bodies
//!
//! Field names follow the server's camelCase JSON.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user_id: String,
    pub user_email: String,
}

/// Album resource. `assets` is only populated by the single-album endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumResponse {
    pub id: String,
    pub album_name: String,
    #[serde(default)]
    pub asset_count: u64,
    #[serde(default)]
    pub album_thumbnail_asset_id: Option<String>,
    /// RFC 3339
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<AssetResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    pub id: String,
    pub device_asset_id: String,
    #[serde(default)]
    pub original_file_name: String,
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlbumRequest<'a> {
    pub album_name: &'a str,
    pub asset_ids: &'a [String],
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAlbumRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_thumbnail_asset_id: Option<&'a str>,
}

/// Body of the album membership endpoints.
#[derive(Debug, Serialize)]
pub struct BulkIdsRequest<'a> {
    pub ids: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct DeleteAssetsRequest<'a> {
    pub ids: &'a [String],
    /// Skip the server-side trash.
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkIdResponse {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// `status` is `created` or `duplicate`; a duplicate carries the id of the
/// asset the server already holds.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Older servers flag duplicates with a boolean instead.
    #[serde(default)]
    pub duplicate: Option<bool>,
}

impl UploadResponse {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate.unwrap_or(false) || self.status.as_deref() == Some("duplicate")
    }
}
