//! `HttpClient` over reqwest with rustls.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartPart},
};
use reqwest::{multipart, Client};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Pooled client. Per-request timeouts override the client default, which
/// matters for uploads of large videos.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("gallery-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap a preconfigured client, e.g. one with a pinned certificate.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    fn build_form(parts: Vec<MultipartPart>) -> Result<multipart::Form> {
        let mut form = multipart::Form::new();
        for part in parts {
            let mut body = multipart::Part::bytes(part.data.to_vec());
            if let Some(file_name) = part.file_name {
                body = body.file_name(file_name);
            }
            if let Some(content_type) = part.content_type {
                body = body.mime_str(&content_type).map_err(|e| {
                    BridgeError::OperationFailed(format!("Invalid content type: {}", e))
                })?;
            }
            form = form.part(part.name, body);
        }
        Ok(form)
    }

    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        let is_multipart = request.multipart.is_some();
        for (key, value) in request.headers {
            // reqwest sets the multipart boundary itself
            if is_multipart && key.eq_ignore_ascii_case("content-type") {
                continue;
            }
            req = req.header(key, value);
        }

        if let Some(parts) = request.multipart {
            req = req.multipart(Self::build_form(parts)?);
        } else if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        Ok(req)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn map_transport_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::OperationFailed("Request timed out".to_string())
        } else if e.is_connect() {
            BridgeError::OperationFailed(format!("Connection failed: {}", e))
        } else {
            BridgeError::OperationFailed(e.to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();
        debug!(method = ?method, url = %url, "Sending request");

        let response = self.send(request).await;
        match &response {
            Ok(response) if !response.is_success() => {
                debug!(status = response.status, "Non-success status")
            }
            Err(e) => warn!(method = ?method, url = %url, error = %e, "Request failed"),
            Ok(_) => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_http_client_creation() {
        assert!(ReqwestHttpClient::new().is_ok());
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Get),
            reqwest::Method::GET
        );
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Patch),
            reqwest::Method::PATCH
        );
    }

    #[test]
    fn test_multipart_request_drops_explicit_content_type() {
        let client = ReqwestHttpClient::new().unwrap();
        let request = HttpRequest::new(HttpMethod::Post, "http://localhost/api/assets")
            .header("Content-Type", "application/json")
            .multipart(vec![
                MultipartPart::text("deviceAssetId", "IMG_1.jpg-1024"),
                MultipartPart::file(
                    "assetData",
                    "IMG_1.jpg",
                    "image/jpeg",
                    Bytes::from_static(b"jpeg"),
                ),
            ]);

        let built = client.build_request(request).unwrap().build().unwrap();
        let content_type = built
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[test]
    fn test_invalid_part_content_type_is_rejected() {
        let parts = vec![MultipartPart::file(
            "assetData",
            "x",
            "not a mime",
            Bytes::new(),
        )];
        assert!(ReqwestHttpClient::build_form(parts).is_err());
    }
}
