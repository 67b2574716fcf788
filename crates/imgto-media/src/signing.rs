//! Request signing
//!
//! Upload parameters are signed by sorting them by key, joining `k=v` pairs
//! with `&`, appending the API secret and taking the hex digest with the
//! account's [`SignatureAlgorithm`] (SHA-1 unless the account opted into
//! SHA-256).
//! Parameters that are not part of the signature (`file`, `api_key`,
//! `cloud_name`, `resource_type`) and empty values are skipped.

use crate::error::{MediaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;

const UNSIGNED: [&str; 4] = ["file", "api_key", "cloud_name", "resource_type"];

/// Digest used for signatures, fixed per account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    /// Account default
    #[default]
    Sha1,
    /// Opt-in
    Sha256,
}

impl SignatureAlgorithm {
    fn digest(self, payload: &[u8], secret: &[u8]) -> String {
        match self {
            Self::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(payload);
                hasher.update(secret);
                hex::encode(hasher.finalize())
            }
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(payload);
                hasher.update(secret);
                hex::encode(hasher.finalize())
            }
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        })
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(MediaError::Config(format!(
                "unknown signature algorithm: {other}"
            ))),
        }
    }
}

/// Sign a parameter set with a secret
#[must_use]
pub fn sign_params(
    params: &BTreeMap<String, String>,
    secret: &str,
    algorithm: SignatureAlgorithm,
) -> String {
    let joined = params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !UNSIGNED.contains(&k.as_str()))
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    algorithm.digest(joined.as_bytes(), secret.as_bytes())
}

/// Produces upload signatures
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signature for `params`
    async fn sign(&self, params: &BTreeMap<String, String>) -> Result<String>;
}

/// Signs with a secret held in process
#[derive(Clone)]
pub struct LocalSigner {
    secret: String,
    algorithm: SignatureAlgorithm,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Create from the API secret
    #[inline]
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: SignatureAlgorithm::default(),
        }
    }

    /// With a non-default digest
    #[inline]
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn sign(&self, params: &BTreeMap<String, String>) -> Result<String> {
        Ok(sign_params(params, &self.secret, self.algorithm))
    }
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

/// Asks a signing endpoint, keeping the secret server side
#[derive(Debug, Clone)]
pub struct RemoteSigner {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteSigner {
    /// Create against `POST {endpoint}`
    #[inline]
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn sign(&self, params: &BTreeMap<String, String>) -> Result<String> {
        let response = self.client.post(&self.endpoint).json(params).send().await?;
        if !response.status().is_success() {
            return Err(MediaError::Signing(format!(
                "signing endpoint returned {}",
                response.status()
            )));
        }
        let body: SignResponse = response.json().await?;
        Ok(body.signature)
    }
}
