//! Pipeline configuration
//!
//! Limits, the accepted-type allow-list and delivery settings. Loaded from
//! the `[pipeline]` section of a TOML file or built in code with the
//! `with_*` builders.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default upper bound on files per session
pub const DEFAULT_MAX_FILES: usize = 20;
/// Default upper bound on a single file (10 MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1_000_000;
/// Default number of concurrent remote uploads
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 10;

/// Allow-list of media types keyed by MIME type, with extension aliases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AcceptList(pub BTreeMap<String, Vec<String>>);

impl AcceptList {
    /// Whether a declared MIME type is allowed
    #[inline]
    #[must_use]
    pub fn accepts_mime(&self, mime: &str) -> bool {
        self.0.contains_key(&mime.to_ascii_lowercase())
    }

    /// MIME type registered for an extension (with leading dot)
    #[must_use]
    pub fn mime_for_extension(&self, extension: &str) -> Option<&str> {
        let extension = extension.to_ascii_lowercase();
        self.0
            .iter()
            .find(|(_, exts)| exts.iter().any(|e| e.eq_ignore_ascii_case(&extension)))
            .map(|(mime, _)| mime.as_str())
    }

    /// Resolve the effective MIME type of a file.
    ///
    /// A declared type wins when it is on the list; otherwise the extension
    /// is looked up, which covers types runtimes do not sniff (HEIF/HEIC).
    #[must_use]
    pub fn resolve(&self, declared: &str, extension: Option<&str>) -> Option<String> {
        if !declared.is_empty() && self.accepts_mime(declared) {
            return Some(declared.to_ascii_lowercase());
        }
        extension
            .and_then(|ext| self.mime_for_extension(ext))
            .map(str::to_string)
    }

    /// Comma separated list for file pickers, using extensions for types
    /// that cannot be matched by MIME
    #[must_use]
    pub fn picker_filter(&self) -> String {
        self.0
            .iter()
            .flat_map(|(mime, exts)| {
                if mime == "image/heif" {
                    exts.clone()
                } else {
                    vec![mime.clone()]
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for AcceptList {
    fn default() -> Self {
        let entries: [(&str, &[&str]); 7] = [
            ("image/avif", &[".avif"]),
            ("image/jpeg", &[".jpg", ".jpeg"]),
            ("image/png", &[".png"]),
            ("image/webp", &[".webp"]),
            ("image/jxl", &[".jxl"]),
            ("image/heif", &[".heic", ".heif"]),
            ("image/heic", &[".heic"]),
        ];
        Self(
            entries
                .into_iter()
                .map(|(mime, exts)| (mime.to_string(), exts.iter().map(|e| e.to_string()).collect()))
                .collect(),
        )
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum records per session
    pub max_files: usize,
    /// Maximum file size in bytes
    pub max_file_size: u64,
    /// Maximum concurrent remote uploads
    pub upload_concurrency: usize,
    /// Optional cap on concurrent preview decodes
    pub preview_concurrency: Option<usize>,
    /// Longest edge of generated thumbnails
    pub preview_max_dimension: u32,
    /// Accepted types
    pub accept: AcceptList,
    /// Types converted to a raster before previewing; the bundled decoder
    /// cannot read these directly
    pub convert_before_preview: Vec<String>,
    /// Quality parameter for delivery URLs
    pub delivery_quality: String,
    /// Eager transform requested with every upload
    pub eager: String,
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With max files
    #[inline]
    #[must_use]
    pub fn with_max_files(mut self, max: usize) -> Self {
        self.max_files = max;
        self
    }

    /// With max file size
    #[inline]
    #[must_use]
    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    /// With upload concurrency
    #[inline]
    #[must_use]
    pub fn with_upload_concurrency(mut self, n: usize) -> Self {
        self.upload_concurrency = n;
        self
    }

    /// With preview concurrency cap
    #[inline]
    #[must_use]
    pub fn with_preview_concurrency(mut self, n: usize) -> Self {
        self.preview_concurrency = Some(n);
        self
    }

    /// Whether a MIME type goes through the converter first
    #[must_use]
    pub fn needs_conversion(&self, mime: &str) -> bool {
        self.convert_before_preview
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime))
    }

    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "upload_concurrency",
                reason: "must be at least 1".into(),
            });
        }
        if self.preview_concurrency == Some(0) {
            return Err(ConfigError::Invalid {
                field: "preview_concurrency",
                reason: "must be at least 1 when set".into(),
            });
        }
        if self.preview_max_dimension == 0 {
            return Err(ConfigError::Invalid {
                field: "preview_max_dimension",
                reason: "must be at least 1".into(),
            });
        }
        if self.accept.0.is_empty() {
            return Err(ConfigError::Invalid {
                field: "accept",
                reason: "at least one type must be accepted".into(),
            });
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            preview_concurrency: None,
            preview_max_dimension: 512,
            accept: AcceptList::default(),
            convert_before_preview: ["image/heic", "image/heif", "image/avif", "image/jxl"]
                .into_iter()
                .map(String::from)
                .collect(),
            delivery_quality: "auto:low".into(),
            eager: "q_auto:low".into(),
        }
    }
}
