//! Error types for the imgto pipeline
//!
//! Provides error handling for:
//! - Ingestion validation (recorded on the record, never thrown)
//! - Preview decoding
//! - Remote uploads and variant fetches
//! - Archive assembly and downloads
//! - Record store and state machine misuse

use crate::types::{Format, RecordId, RecordState};

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Preview decoding failed
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Remote upload failed
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    /// Variant fetch failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Archive build failed
    #[error("archive failed: {0}")]
    Archive(#[from] ArchiveError),

    /// Download failed
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    /// Record store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Check if a second attempt could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upload(e) => e.is_retryable(),
            Self::Fetch(e) => e.is_retryable(),
            Self::Archive(ArchiveError::Fetch { source, .. }) => source.is_retryable(),
            _ => false,
        }
    }
}

/// Ingestion validation failures.
///
/// The display text is the user-facing message stored on the record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Declared type is not in the allow-list
    #[error("File type not accepted.")]
    UnsupportedType,

    /// File is larger than the configured maximum
    #[error("File size exceeds limit.")]
    TooLarge {
        /// Size of the offending file
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// Session already holds the maximum number of files
    #[error("Max allowed number of files reached.")]
    TooManyFiles {
        /// Configured maximum
        max: usize,
    },
}

/// Preview decoding failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    /// Bytes could not be decoded as an image
    #[error("unable to decode image: {0}")]
    Corrupt(String),

    /// Type needs conversion but no converter is installed
    #[error("no converter available for {0}")]
    ConverterUnavailable(String),

    /// Conversion to a displayable raster failed
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Preview encoding failed
    #[error("unable to encode preview: {0}")]
    Encode(String),

    /// Decode task panicked or was cancelled
    #[error("decode task failed: {0}")]
    Task(String),
}

impl DecodeError {
    /// Message stored on the record
    #[inline]
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ConverterUnavailable(_) | Self::Conversion(_) => {
                "This image format could not be converted for preview."
            }
            _ => "Unable to read image.",
        }
    }
}

/// Remote upload failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// Content moderation rejected the image
    #[error("content rejected by moderation")]
    Rejected,

    /// Image is below the service's minimum pixel resolution
    #[error("image resolution too small")]
    ResolutionTooSmall,

    /// Any other failure
    #[error("{0}")]
    Failed(String),
}

impl UploadError {
    /// Message stored on the record and published as a notice
    #[inline]
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Rejected => {
                "An image you uploaded appears to be inappropriate and not supported. \
                 If you think this is in error, please contact support."
            }
            Self::ResolutionTooSmall => "Images smaller than 80x80px are not supported.",
            Self::Failed(_) => "Something went wrong, try again!",
        }
    }

    /// Check if a second attempt could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Plain fetch failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Server answered 401
    #[error("unauthorized")]
    Unauthorized,

    /// Server answered with another non-success status
    #[error("unexpected status {0}")]
    Status(u16),

    /// Connection or body read failed
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Message stored on the record and published as a notice
    #[inline]
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Something went wrong. Try disabling any Ad Blockers and try again!",
            _ => "Unknown Error",
        }
    }

    /// Check if a second attempt could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(code) => *code >= 500,
            Self::Unauthorized => false,
        }
    }
}

/// Archive build failures
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Nothing to archive
    #[error("no finished images to archive")]
    Empty,

    /// A member could not be fetched; the whole build is abandoned
    #[error("failed to fetch {name}: {source}")]
    Fetch {
        /// Member name inside the archive
        name: String,
        /// Underlying fetch failure
        #[source]
        source: FetchError,
    },

    /// Zip writer failure
    #[error("zip error: {0}")]
    Zip(String),

    /// Packaging task panicked or was cancelled
    #[error("archive task failed: {0}")]
    Task(String),
}

/// Download failures
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Fetching the URL failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Filename is empty after sanitizing
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    /// Writing or persisting the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Save task panicked or was cancelled
    #[error("save task failed: {0}")]
    Task(String),
}

/// Record store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No record with this id in the collection
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// Requested transition is not in the state machine
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Record has no variant of the requested format
    #[error("record {id} has no {format} variant")]
    MissingVariant {
        /// Record id
        id: RecordId,
        /// Requested format
        format: Format,
    },
}

/// Illegal state machine transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    /// Current state
    pub from: RecordState,
    /// Requested state
    pub to: RecordState,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("unable to read {path}: {source}")]
    Read {
        /// Path that failed
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for the expected shape
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
