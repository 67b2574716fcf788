//! Remote media service boundary
//!
//! The pipeline only talks to the hosted media API through these traits:
//! - [`MediaService`] uploads originals and builds delivery URLs
//! - [`Fetcher`] downloads bytes from a URL

use crate::error::{FetchError, UploadError};
use crate::types::{Format, RemoteAsset};
use async_trait::async_trait;
use bytes::Bytes;

/// A single upload call
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Original filename
    pub filename: String,
    /// Resolved media type
    pub mime: String,
    /// Raw file bytes
    pub bytes: Bytes,
    /// Eager transform directive (e.g. `q_auto:low`)
    pub eager: String,
}

/// Delivery URL parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// Target format
    pub format: Format,
    /// Quality parameter (e.g. `auto:low`)
    pub quality: String,
}

impl DeliveryOptions {
    /// Create options for a format
    #[inline]
    #[must_use]
    pub fn new(format: Format, quality: impl Into<String>) -> Self {
        Self {
            format,
            quality: quality.into(),
        }
    }
}

/// Hosted media transformation and storage service
#[async_trait]
pub trait MediaService: Send + Sync {
    /// Upload one original; a single attempt
    async fn upload(&self, request: UploadRequest) -> Result<RemoteAsset, UploadError>;

    /// Build a delivery URL; no network access
    fn delivery_url(&self, remote_id: &str, options: &DeliveryOptions) -> String;
}

/// Plain byte download
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full body of `url`
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}
