//! Media service configuration

use crate::error::{MediaError, Result};
use crate::signing::SignatureAlgorithm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upload API base
pub const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// Default delivery base
pub const DEFAULT_DELIVERY_BASE: &str = "https://res.cloudinary.com";

/// Connection settings for a Cloudinary-compatible service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Account (cloud) name
    pub cloud_name: String,
    /// Public API key
    pub api_key: String,
    /// API secret; when absent uploads are signed through `signing_endpoint`
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    /// Folder uploads are placed in
    pub upload_folder: Option<String>,
    /// Upload API base URL
    pub api_base: String,
    /// Delivery base URL
    pub delivery_base: String,
    /// URL of a `POST /api/sign` endpoint
    pub signing_endpoint: Option<String>,
    /// Digest the account verifies signatures with
    pub signature_algorithm: SignatureAlgorithm,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: None,
            upload_folder: None,
            api_base: DEFAULT_API_BASE.to_string(),
            delivery_base: DEFAULT_DELIVERY_BASE.to_string(),
            signing_endpoint: None,
            signature_algorithm: SignatureAlgorithm::default(),
            timeout_secs: 60,
        }
    }
}

impl MediaConfig {
    /// Config for an account
    #[must_use]
    pub fn new(cloud_name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// With an API secret for local signing
    #[inline]
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = Some(secret.into());
        self
    }

    /// With an upload folder
    #[inline]
    #[must_use]
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.upload_folder = Some(folder.into());
        self
    }

    /// With custom API and delivery bases
    #[inline]
    #[must_use]
    pub fn with_bases(mut self, api_base: impl Into<String>, delivery_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.delivery_base = delivery_base.into();
        self
    }

    /// With a remote signing endpoint
    #[inline]
    #[must_use]
    pub fn with_signing_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.signing_endpoint = Some(endpoint.into());
        self
    }

    /// With a non-default signature digest
    #[inline]
    #[must_use]
    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    /// Request timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Overlay `CLOUDINARY_*` environment variables
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Overlay values from a lookup function
    #[must_use]
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = lookup("CLOUDINARY_CLOUD_NAME") {
            self.cloud_name = v;
        }
        if let Some(v) = lookup("CLOUDINARY_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = lookup("CLOUDINARY_API_SECRET") {
            self.api_secret = Some(v);
        }
        if let Some(v) = lookup("CLOUDINARY_UPLOADS_FOLDER") {
            self.upload_folder = Some(v);
        }
        if let Some(v) = lookup("CLOUDINARY_SIGNATURE_ALGORITHM") {
            match v.parse() {
                Ok(algorithm) => self.signature_algorithm = algorithm,
                Err(e) => tracing::warn!(error = %e, "ignoring CLOUDINARY_SIGNATURE_ALGORITHM"),
            }
        }
        self
    }

    /// Check that uploads can be made
    pub fn validate(&self) -> Result<()> {
        if self.cloud_name.is_empty() {
            return Err(MediaError::Config("cloud_name is required".into()));
        }
        if self.api_key.is_empty() {
            return Err(MediaError::Config("api_key is required".into()));
        }
        if self.api_secret.is_none() && self.signing_endpoint.is_none() {
            return Err(MediaError::Config(
                "either api_secret or signing_endpoint is required".into(),
            ));
        }
        Ok(())
    }

    /// Upload URL for images
    #[must_use]
    pub fn upload_url(&self) -> String {
        format!("{}/{}/image/upload", self.api_base.trim_end_matches('/'), self.cloud_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CLOUDINARY_CLOUD_NAME", "demo"),
            ("CLOUDINARY_API_KEY", "123"),
            ("CLOUDINARY_API_SECRET", "shh"),
            ("CLOUDINARY_UPLOADS_FOLDER", ""),
        ]);
        let config = MediaConfig::default().with_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.cloud_name, "demo");
        assert_eq!(config.api_secret.as_deref(), Some("shh"));
        assert_eq!(config.upload_folder, None);
        assert!(config.validate().is_ok());
        assert_eq!(config.upload_url(), "https://api.cloudinary.com/v1_1/demo/image/upload");
        assert_eq!(config.signature_algorithm, SignatureAlgorithm::Sha1);
    }

    #[test]
    fn signature_algorithm_from_env() {
        let config = MediaConfig::default()
            .with_vars(|k| (k == "CLOUDINARY_SIGNATURE_ALGORITHM").then(|| "sha256".to_string()));
        assert_eq!(config.signature_algorithm, SignatureAlgorithm::Sha256);

        let config = MediaConfig::default()
            .with_vars(|k| (k == "CLOUDINARY_SIGNATURE_ALGORITHM").then(|| "md5".to_string()));
        assert_eq!(config.signature_algorithm, SignatureAlgorithm::Sha1);
    }

    #[test]
    fn needs_a_way_to_sign() {
        let err = MediaConfig::new("demo", "123").validate().unwrap_err();
        assert!(matches!(err, MediaError::Config(_)));
        assert!(MediaConfig::new("demo", "123")
            .with_signing_endpoint("http://localhost/api/sign")
            .validate()
            .is_ok());
    }

    #[test]
    fn secret_is_never_serialized() {
        let json = serde_json::to_string(&MediaConfig::new("demo", "1").with_secret("shh")).unwrap();
        assert!(!json.contains("shh"));
    }
}
