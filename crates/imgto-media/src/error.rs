//! Error types for the media client

/// Media client setup and signing errors
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Configuration is incomplete or invalid
    #[error("invalid media config: {0}")]
    Config(String),

    /// Signature could not be produced
    #[error("signing failed: {0}")]
    Signing(String),

    /// HTTP client error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MediaError {
    /// Check if a second attempt could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Result type for media client operations
pub type Result<T> = std::result::Result<T, MediaError>;
