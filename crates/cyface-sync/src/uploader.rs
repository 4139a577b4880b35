//! Multipart upload to the collector.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::auth::Token;
use crate::error::{Result, SyncError};
use crate::metadata::{PAYLOAD_FIELD, UploadMetadata};

/// MIME type of the binary payload.
pub const PAYLOAD_MIME: &str = "application/octet-stream";

/// One measurement ready to send.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Descriptive form fields.
    pub metadata: UploadMetadata,
    /// Compressed `.cyf` payload.
    pub payload: Bytes,
}

/// The collector's answer to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, possibly empty.
    pub body: String,
}

impl UploadResponse {
    /// 201 Created: the collector stored the measurement.
    pub fn is_created(&self) -> bool {
        self.status == 201
    }

    /// 409 Conflict: the collector already had the measurement.
    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    /// 401 Unauthorized: the token was refused.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

/// Sends upload requests.
///
/// Implementations return `Ok` for every HTTP answer, whatever the status,
/// and an error only when no answer arrived.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Send `request` authorized with `token`.
    async fn upload(&self, request: &UploadRequest, token: &Token) -> Result<UploadResponse>;
}

/// Trim a trailing slash and require an http(s) scheme.
pub(crate) fn normalize_url(url: &str) -> Result<String> {
    let url = url.trim_end_matches('/').to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(SyncError::InvalidConfig(format!(
            "URL must start with http:// or https://, got: {}",
            url
        )));
    }
    Ok(url)
}

/// Uploads to `{collector}/measurements` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    endpoint: String,
}

impl HttpUploader {
    /// Create an uploader for the collector at `collector_url`.
    pub fn new(collector_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Self::with_client(collector_url, client)
    }

    /// Create an uploader with a custom reqwest Client.
    pub fn with_client(collector_url: &str, client: Client) -> Result<Self> {
        let base_url = normalize_url(collector_url)?;
        Ok(Self {
            client,
            endpoint: format!("{}/measurements", base_url),
        })
    }

    /// The upload endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form(request: &UploadRequest) -> Result<Form> {
        let form = request
            .metadata
            .form_fields()
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));

        let part = Part::bytes(request.payload.to_vec())
            .file_name(request.metadata.file_name())
            .mime_str(PAYLOAD_MIME)
            .map_err(SyncError::transport)?;

        Ok(form.part(PAYLOAD_FIELD, part))
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, request: &UploadRequest, token: &Token) -> Result<UploadResponse> {
        debug!(
            url = %self.endpoint,
            measurement_id = request.metadata.measurement_id,
            bytes = request.payload.len(),
            "Uploading measurement"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token.as_str())
            .multipart(Self::form(request)?)
            .send()
            .await
            .map_err(SyncError::transport)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(SyncError::transport)?;
        Ok(UploadResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalization() {
        let uploader =
            HttpUploader::new("https://collector.example.com/api/v4/", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            uploader.endpoint(),
            "https://collector.example.com/api/v4/measurements"
        );
    }

    #[test]
    fn test_invalid_scheme() {
        assert!(matches!(
            HttpUploader::new("collector.example.com", Duration::from_secs(5)),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_response_classification() {
        let response = |status| UploadResponse {
            status,
            body: String::new(),
        };
        assert!(response(201).is_created());
        assert!(response(409).is_conflict());
        assert!(response(401).is_unauthorized());
        assert!(!response(200).is_created());
    }
}
