//! Immich API client
//!
//! Implements [`PhotoServer`] over the host [`HttpClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartPart};
use bridge_traits::remote::{
    AlbumUpdate, PhotoServer, RemoteAlbum, RemoteAsset, Session, UploadRequest, UploadedAsset,
};
use chrono::{DateTime, Utc};
use core_async::sync::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::error::{ImmichError, Result};
use crate::types::{
    AlbumResponse, AssetResponse, BulkIdResponse, BulkIdsRequest, CreateAlbumRequest,
    DeleteAssetsRequest, LoginRequest, LoginResponse, UpdateAlbumRequest, UploadResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Immich REST client.
///
/// # Example
///
/// ```ignore
/// use provider_immich::ImmichClient;
/// use bridge_traits::remote::PhotoServer;
///
/// let client = ImmichClient::new(http_client, "https://photos.example.org")?;
/// client.login("me@example.org", "secret").await?;
/// let albums = client.list_albums().await?;
/// ```
pub struct ImmichClient {
    http_client: Arc<dyn HttpClient>,
    /// Server root without a trailing slash
    base_url: String,
    access_token: RwLock<Option<String>>,
}

impl ImmichClient {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ImmichError::InvalidUrl(base_url));
        }
        Ok(Self {
            http_client,
            base_url: trimmed.to_string(),
            access_token: RwLock::new(None),
        })
    }

    /// Resume a session from a previously issued token.
    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        Self {
            access_token: RwLock::new(Some(token.into())),
            ..self
        }
    }

    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    pub async fn logout(&self) {
        *self.access_token.write().await = None;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn authorized(&self, method: HttpMethod, path: &str) -> Result<HttpRequest> {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or(ImmichError::NotLoggedIn)?;
        Ok(HttpRequest::new(method, self.url(path))
            .bearer_token(token)
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT))
    }

    /// Execute `request` and turn non-2xx statuses into typed errors.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let response = self.http_client.execute(request).await?;
        if response.is_success() {
            debug!(status = response.status, "Immich request succeeded");
            return Ok(response);
        }

        let message = response.body_text();
        warn!(status = response.status, "Immich request failed");
        Err(match response.status {
            401 | 403 => ImmichError::AuthenticationFailed(message),
            404 => ImmichError::NotFound { resource: url },
            status_code => ImmichError::ApiError {
                status_code,
                message,
            },
        })
    }

    fn parse<T: DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T> {
        serde_json::from_slice(&response.body)
            .map_err(|e| ImmichError::ParseError(format!("{}: {}", what, e)))
    }

    fn parse_timestamp(rfc3339: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn convert_asset(asset: AssetResponse) -> RemoteAsset {
        RemoteAsset {
            id: asset.id,
            device_asset_id: asset.device_asset_id,
            original_file_name: asset.original_file_name,
            checksum: asset.checksum,
        }
    }

    fn convert_album(album: AlbumResponse) -> RemoteAlbum {
        RemoteAlbum {
            id: album.id,
            name: album.album_name,
            asset_count: album.asset_count,
            thumbnail_asset_id: album.album_thumbnail_asset_id,
            updated_at: album.updated_at.as_deref().and_then(Self::parse_timestamp),
            assets: album.assets.into_iter().map(Self::convert_asset).collect(),
        }
    }
}

#[async_trait]
impl PhotoServer for ImmichClient {
    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> BridgeResult<Session> {
        let request = HttpRequest::new(HttpMethod::Post, self.url("/auth/login"))
            .timeout(REQUEST_TIMEOUT)
            .json(&LoginRequest { email, password })?;
        let response = self.send(request).await?;
        let login: LoginResponse = Self::parse(&response, "login response")?;

        *self.access_token.write().await = Some(login.access_token.clone());
        info!(user_id = %login.user_id, "Logged in to Immich");
        Ok(Session {
            access_token: login.access_token,
            user_id: login.user_id,
            user_email: login.user_email,
        })
    }

    async fn list_albums(&self) -> BridgeResult<Vec<RemoteAlbum>> {
        let request = self.authorized(HttpMethod::Get, "/albums").await?;
        let response = self.send(request).await?;
        let albums: Vec<AlbumResponse> = Self::parse(&response, "album list")?;
        debug!(count = albums.len(), "Listed Immich albums");
        Ok(albums.into_iter().map(Self::convert_album).collect())
    }

    async fn get_album(&self, album_id: &str) -> BridgeResult<RemoteAlbum> {
        let request = self
            .authorized(HttpMethod::Get, &format!("/albums/{}", album_id))
            .await?;
        let response = self.send(request).await?;
        let album: AlbumResponse = Self::parse(&response, "album")?;
        Ok(Self::convert_album(album))
    }

    #[instrument(skip(self, asset_ids), fields(assets = asset_ids.len()))]
    async fn create_album(&self, name: &str, asset_ids: &[String]) -> BridgeResult<RemoteAlbum> {
        let request = self
            .authorized(HttpMethod::Post, "/albums")
            .await?
            .json(&CreateAlbumRequest {
                album_name: name,
                asset_ids,
            })?;
        let response = self.send(request).await?;
        let album: AlbumResponse = Self::parse(&response, "created album")?;
        info!(album_id = %album.id, "Created Immich album");
        Ok(Self::convert_album(album))
    }

    async fn update_album(&self, album_id: &str, update: &AlbumUpdate) -> BridgeResult<RemoteAlbum> {
        let request = self
            .authorized(HttpMethod::Patch, &format!("/albums/{}", album_id))
            .await?
            .json(&UpdateAlbumRequest {
                album_name: update.name.as_deref(),
                album_thumbnail_asset_id: update.thumbnail_asset_id.as_deref(),
            })?;
        let response = self.send(request).await?;
        let album: AlbumResponse = Self::parse(&response, "updated album")?;
        Ok(Self::convert_album(album))
    }

    async fn delete_album(&self, album_id: &str) -> BridgeResult<()> {
        let request = self
            .authorized(HttpMethod::Delete, &format!("/albums/{}", album_id))
            .await?;
        self.send(request).await?;
        info!(album_id, "Deleted Immich album");
        Ok(())
    }

    #[instrument(skip(self, request), fields(device_asset_id = %request.device_asset_id, bytes = request.data.len()))]
    async fn upload_asset(&self, request: UploadRequest) -> BridgeResult<UploadedAsset> {
        let parts = vec![
            MultipartPart::file(
                "assetData",
                request.file_name.clone(),
                request.mime_type.clone(),
                request.data,
            ),
            MultipartPart::text("deviceAssetId", request.device_asset_id),
            MultipartPart::text("deviceId", request.device_id),
            MultipartPart::text("fileCreatedAt", request.file_created_at.to_rfc3339()),
            MultipartPart::text("fileModifiedAt", request.file_modified_at.to_rfc3339()),
            MultipartPart::text("isFavorite", request.is_favorite.to_string()),
        ];
        let http_request = self
            .authorized(HttpMethod::Post, "/assets")
            .await?
            .timeout(UPLOAD_TIMEOUT)
            .multipart(parts);
        let response = self.send(http_request).await?;
        let uploaded: UploadResponse = Self::parse(&response, "upload response")?;

        let duplicate = uploaded.is_duplicate();
        debug!(asset_id = %uploaded.id, duplicate, "Uploaded asset");
        Ok(UploadedAsset {
            id: uploaded.id,
            duplicate,
        })
    }

    async fn add_assets_to_album(
        &self,
        album_id: &str,
        asset_ids: &[String],
    ) -> BridgeResult<Vec<String>> {
        let request = self
            .authorized(HttpMethod::Put, &format!("/albums/{}/assets", album_id))
            .await?
            .json(&BulkIdsRequest { ids: asset_ids })?;
        let response = self.send(request).await?;
        let results: Vec<BulkIdResponse> = Self::parse(&response, "album asset results")?;

        let mut added = Vec::with_capacity(results.len());
        for result in results {
            if result.success {
                added.push(result.id);
            } else {
                // `duplicate` means the asset is already a member.
                debug!(asset_id = %result.id, error = ?result.error, "Asset not added to album");
            }
        }
        Ok(added)
    }

    async fn remove_assets_from_album(
        &self,
        album_id: &str,
        asset_ids: &[String],
    ) -> BridgeResult<()> {
        let request = self
            .authorized(HttpMethod::Delete, &format!("/albums/{}/assets", album_id))
            .await?
            .json(&BulkIdsRequest { ids: asset_ids })?;
        self.send(request).await?;
        Ok(())
    }

    async fn delete_assets(&self, asset_ids: &[String]) -> BridgeResult<()> {
        let request = self
            .authorized(HttpMethod::Delete, "/assets")
            .await?
            .json(&DeleteAssetsRequest {
                ids: asset_ids,
                force: false,
            })?;
        self.send(request).await?;
        info!(count = asset_ids.len(), "Deleted Immich assets");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn respond(status: u16, body: &str) -> BridgeResult<HttpResponse> {
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        })
    }

    fn body_json(request: &HttpRequest) -> serde_json::Value {
        serde_json::from_slice(request.body.as_ref().unwrap()).unwrap()
    }

    fn logged_in(mock: MockHttpClient) -> ImmichClient {
        ImmichClient::new(Arc::new(mock), "https://photos.example.org/")
            .unwrap()
            .with_access_token("token-1")
    }

    #[test]
    fn test_rejects_url_without_scheme() {
        let result = ImmichClient::new(Arc::new(MockHttpClient::new()), "photos.example.org");
        assert!(matches!(result, Err(ImmichError::InvalidUrl(_))));
    }

    #[core_async::test]
    async fn test_login_stores_token() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Post);
            assert_eq!(req.url, "https://photos.example.org/api/auth/login");
            assert!(!req.headers.contains_key("Authorization"));
            assert_eq!(body_json(&req)["email"], "me@example.org");
            respond(
                201,
                r#"{"accessToken":"abc","userId":"u1","userEmail":"me@example.org","name":"Me"}"#,
            )
        });

        let client = ImmichClient::new(Arc::new(mock_http), "https://photos.example.org").unwrap();
        let session = client.login("me@example.org", "secret").await.unwrap();

        assert_eq!(session.access_token, "abc");
        assert_eq!(session.user_id, "u1");
        assert_eq!(client.access_token().await.as_deref(), Some("abc"));
    }

    #[core_async::test]
    async fn test_login_rejected() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| respond(401, r#"{"message":"Incorrect email or password"}"#));

        let client = ImmichClient::new(Arc::new(mock_http), "https://photos.example.org").unwrap();
        let result = client.login("me@example.org", "wrong").await;

        assert!(matches!(result, Err(BridgeError::Unauthorized(_))));
        assert!(client.access_token().await.is_none());
    }

    #[core_async::test]
    async fn test_requests_need_a_session() {
        let client =
            ImmichClient::new(Arc::new(MockHttpClient::new()), "https://photos.example.org").unwrap();
        let result = client.list_albums().await;
        assert!(matches!(result, Err(BridgeError::Unauthorized(_))));
    }

    #[core_async::test]
    async fn test_list_albums() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.url, "https://photos.example.org/api/albums");
            assert_eq!(
                req.headers.get("Authorization").map(String::as_str),
                Some("Bearer token-1")
            );
            respond(
                200,
                r#"[
                    {"id":"a1","albumName":"Camera","assetCount":2,
                     "albumThumbnailAssetId":"x1","updatedAt":"2024-03-01T10:00:00.000Z","assets":[]},
                    {"id":"a2","albumName":"Screenshots","assetCount":0}
                ]"#,
            )
        });

        let albums = logged_in(mock_http).list_albums().await.unwrap();

        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].name, "Camera");
        assert_eq!(albums[0].asset_count, 2);
        assert_eq!(albums[0].thumbnail_asset_id.as_deref(), Some("x1"));
        assert!(albums[0].updated_at.is_some());
        assert!(albums[1].thumbnail_asset_id.is_none());
    }

    #[core_async::test]
    async fn test_get_album_with_assets() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.url, "https://photos.example.org/api/albums/a1");
            respond(
                200,
                r#"{"id":"a1","albumName":"Camera","assetCount":1,"assets":[
                    {"id":"x1","deviceAssetId":"IMG_1.jpg-1024","originalFileName":"IMG_1.jpg",
                     "checksum":"c2hh","type":"IMAGE"}
                ]}"#,
            )
        });

        let album = logged_in(mock_http).get_album("a1").await.unwrap();
        let ids: Vec<&str> = album.device_asset_ids().collect();
        assert_eq!(ids, vec!["IMG_1.jpg-1024"]);
        assert_eq!(album.assets[0].checksum.as_deref(), Some("c2hh"));
    }

    #[core_async::test]
    async fn test_missing_album_maps_to_not_found() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| respond(404, "Not Found"));

        let result = logged_in(mock_http).get_album("gone").await;
        assert!(matches!(result, Err(BridgeError::NotFound(ref url)) if url.ends_with("/albums/gone")));
    }

    #[core_async::test]
    async fn test_server_error_is_operation_failure() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| respond(503, "Service Unavailable"));

        let result = logged_in(mock_http).list_albums().await;
        assert!(matches!(result, Err(BridgeError::OperationFailed(ref m)) if m.contains("503")));
    }

    #[core_async::test]
    async fn test_update_album_sends_only_set_fields() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Patch);
            let body = body_json(&req);
            assert_eq!(body["albumThumbnailAssetId"], "x9");
            assert!(body.get("albumName").is_none());
            respond(
                200,
                r#"{"id":"a1","albumName":"Camera","albumThumbnailAssetId":"x9"}"#,
            )
        });

        let update = AlbumUpdate {
            name: None,
            thumbnail_asset_id: Some("x9".into()),
        };
        let album = logged_in(mock_http).update_album("a1", &update).await.unwrap();
        assert_eq!(album.thumbnail_asset_id.as_deref(), Some("x9"));
    }

    #[core_async::test]
    async fn test_upload_asset_multipart() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.url, "https://photos.example.org/api/assets");
            assert_eq!(req.timeout, Some(UPLOAD_TIMEOUT));
            let parts = req.multipart.as_ref().unwrap();
            let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(
                names,
                vec![
                    "assetData",
                    "deviceAssetId",
                    "deviceId",
                    "fileCreatedAt",
                    "fileModifiedAt",
                    "isFavorite"
                ]
            );
            assert_eq!(parts[0].file_name.as_deref(), Some("IMG_1.jpg"));
            assert_eq!(parts[1].data, Bytes::from("IMG_1.jpg-3"));
            assert_eq!(parts[5].data, Bytes::from("true"));
            respond(201, r#"{"id":"x1","status":"created"}"#)
        });

        let request = UploadRequest {
            device_asset_id: "IMG_1.jpg-3".into(),
            device_id: "pixel".into(),
            file_name: "IMG_1.jpg".into(),
            mime_type: "image/jpeg".into(),
            data: Bytes::from_static(b"abc"),
            file_created_at: Utc::now(),
            file_modified_at: Utc::now(),
            is_favorite: true,
        };
        let uploaded = logged_in(mock_http).upload_asset(request).await.unwrap();
        assert_eq!(uploaded.id, "x1");
        assert!(!uploaded.duplicate);
    }

    #[test]
    fn test_upload_response_duplicate_flags() {
        let created: UploadResponse = serde_json::from_str(r#"{"id":"x1","status":"created"}"#).unwrap();
        let dupe: UploadResponse = serde_json::from_str(r#"{"id":"x0","status":"duplicate"}"#).unwrap();
        let legacy: UploadResponse = serde_json::from_str(r#"{"id":"x0","duplicate":true}"#).unwrap();

        assert!(!created.is_duplicate());
        assert!(dupe.is_duplicate());
        assert!(legacy.is_duplicate());
    }

    #[core_async::test]
    async fn test_add_assets_reports_successful_ids() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Put);
            assert_eq!(req.url, "https://photos.example.org/api/albums/a1/assets");
            assert_eq!(body_json(&req)["ids"], serde_json::json!(["x1", "x2"]));
            respond(
                200,
                r#"[{"id":"x1","success":true},{"id":"x2","success":false,"error":"duplicate"}]"#,
            )
        });

        let added = logged_in(mock_http)
            .add_assets_to_album("a1", &["x1".to_string(), "x2".to_string()])
            .await
            .unwrap();
        assert_eq!(added, vec!["x1".to_string()]);
    }

    #[core_async::test]
    async fn test_delete_assets() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Delete);
            assert_eq!(req.url, "https://photos.example.org/api/assets");
            let body = body_json(&req);
            assert_eq!(body["ids"], serde_json::json!(["x1"]));
            assert_eq!(body["force"], false);
            respond(204, "")
        });

        logged_in(mock_http)
            .delete_assets(&["x1".to_string()])
            .await
            .unwrap();
    }

    #[core_async::test]
    async fn test_logout_clears_token() {
        let client = logged_in(MockHttpClient::new());
        client.logout().await;
        assert!(client.access_token().await.is_none());
    }
}
