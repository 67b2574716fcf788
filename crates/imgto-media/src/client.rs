//! Cloudinary-compatible HTTP client
//!
//! Implements both pipeline boundaries:
//! - [`MediaService`]: signed multipart uploads and delivery URL building
//! - [`Fetcher`]: plain GET of delivery URLs, also usable on its own as
//!   [`HttpFetcher`]

use crate::config::MediaConfig;
use crate::error::{MediaError, Result};
use crate::signing::{LocalSigner, RemoteSigner, Signer};
use async_trait::async_trait;
use bytes::Bytes;
use imgto_core::error::{FetchError, UploadError};
use imgto_core::media::{DeliveryOptions, Fetcher, MediaService, UploadRequest};
use imgto_core::types::RemoteAsset;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Marker the service returns for moderation rejections
const INAPPROPRIATE_CONTENT: &str = "INAPPROPRIATE_CONTENT";

/// Fragment of the service's minimum resolution error
const MIN_RESOLUTION: &str = "minimum pixel resolution";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    format: String,
    width: u32,
    height: u32,
    bytes: u64,
    #[serde(default)]
    original_filename: Option<String>,
    #[serde(default)]
    secure_url: Option<String>,
    #[serde(default)]
    moderation: Vec<Moderation>,
}

#[derive(Debug, Deserialize)]
struct Moderation {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

/// Map a service error message onto the upload failure kinds
#[must_use]
pub fn classify_upload_error(message: &str) -> UploadError {
    if message.contains(INAPPROPRIATE_CONTENT) {
        UploadError::Rejected
    } else if message.to_ascii_lowercase().contains(MIN_RESOLUTION) {
        UploadError::ResolutionTooSmall
    } else {
        UploadError::Failed(message.to_string())
    }
}

/// HTTP client for a Cloudinary-compatible service
#[derive(Clone)]
pub struct CloudinaryClient {
    http: Client,
    fetcher: HttpFetcher,
    config: Arc<MediaConfig>,
    signer: Arc<dyn Signer>,
}

impl std::fmt::Debug for CloudinaryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryClient")
            .field("cloud_name", &self.config.cloud_name)
            .field("api_base", &self.config.api_base)
            .finish_non_exhaustive()
    }
}

impl CloudinaryClient {
    /// Build a client, signing locally when a secret is configured and
    /// through the signing endpoint otherwise
    pub fn new(config: MediaConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder().timeout(config.timeout()).build()?;

        let signer: Arc<dyn Signer> = match (&config.api_secret, &config.signing_endpoint) {
            (Some(secret), _) => Arc::new(
                LocalSigner::new(secret.clone()).with_algorithm(config.signature_algorithm),
            ),
            (None, Some(endpoint)) => Arc::new(RemoteSigner::new(http.clone(), endpoint.clone())),
            (None, None) => {
                return Err(MediaError::Config("no signing method configured".into()));
            }
        };

        Ok(Self {
            fetcher: HttpFetcher::with_client(http.clone()),
            http,
            config: Arc::new(config),
            signer,
        })
    }

    /// Replace the signer
    #[inline]
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    fn upload_params(&self, eager: &str) -> BTreeMap<String, String> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let mut params = BTreeMap::new();
        params.insert("eager".to_string(), eager.to_string());
        if let Some(folder) = &self.config.upload_folder {
            params.insert("folder".to_string(), folder.clone());
        }
        params.insert("timestamp".to_string(), timestamp.to_string());
        params
    }
}

#[async_trait]
impl MediaService for CloudinaryClient {
    async fn upload(&self, request: UploadRequest) -> std::result::Result<RemoteAsset, UploadError> {
        let params = self.upload_params(&request.eager);
        let signature = self
            .signer
            .sign(&params)
            .await
            .map_err(|e| UploadError::Failed(e.to_string()))?;

        let mut file = Part::bytes(request.bytes.to_vec()).file_name(request.filename.clone());
        if !request.mime.is_empty() {
            file = file
                .mime_str(&request.mime)
                .map_err(|e| UploadError::Failed(e.to_string()))?;
        }
        let form = params
            .into_iter()
            .fold(Form::new(), |form, (k, v)| form.text(k, v))
            .part("file", file)
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature);

        tracing::debug!(filename = %request.filename, size = request.bytes.len(), "uploading");
        let response = self
            .http
            .post(self.config.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Failed(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Failed(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            tracing::warn!(filename = %request.filename, %status, %message, "upload rejected");
            return Err(classify_upload_error(&message));
        }

        let parsed: UploadResponse =
            serde_json::from_str(&body).map_err(|e| UploadError::Failed(e.to_string()))?;
        if parsed.moderation.iter().any(|m| m.status == "rejected") {
            return Err(UploadError::Rejected);
        }

        Ok(RemoteAsset {
            remote_id: parsed.public_id,
            format: parsed.format,
            width: parsed.width,
            height: parsed.height,
            bytes: parsed.bytes,
            original_filename: parsed.original_filename.unwrap_or_default(),
            secure_url: parsed.secure_url,
        })
    }

    fn delivery_url(&self, remote_id: &str, options: &DeliveryOptions) -> String {
        let transform = match options.format.delivery_format() {
            Some(format) => format!("f_{format},q_{}", options.quality),
            None => format!("q_{}", options.quality),
        };
        format!(
            "{}/{}/image/upload/{transform}/{remote_id}",
            self.config.delivery_base.trim_end_matches('/'),
            self.config.cloud_name
        )
    }
}

#[async_trait]
impl Fetcher for CloudinaryClient {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        self.fetcher.fetch(url).await
    }
}

/// Plain HTTP [`Fetcher`] for delivery URLs
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Build with a request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(Client::builder().timeout(timeout).build()?))
    }

    /// Reuse an existing client
    #[inline]
    #[must_use]
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized),
            status if !status.is_success() => Err(FetchError::Status(status.as_u16())),
            _ => response
                .bytes()
                .await
                .map_err(|e| FetchError::Transport(e.to_string())),
        }
    }
}
