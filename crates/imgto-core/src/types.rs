//! Core types for the pipeline
//!
//! Defines the per-file record and everything hanging off it:
//! - Record identifiers and lifecycle states
//! - The closed set of delivery formats and the variant mapping
//! - Remote upload metadata and local previews
//! - The immutable source file handle

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Unique record identifier within a session
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Derive an id from ingestion time and filename
    #[inline]
    #[must_use]
    pub fn derive(timestamp_ms: u64, name: &str) -> Self {
        Self(format!("{timestamp_ms}-{name}"))
    }

    /// Borrow as `&str`
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// Accepted, preview not started
    Dropped,
    /// Preview decode in progress
    Reading,
    /// Preview decoded, waiting for upload admission
    Read,
    /// Remote upload in flight
    Uploading,
    /// Uploaded, variants being prepared
    Optimizing,
    /// Variants available
    Finished,
    /// Terminal failure
    Error,
}

impl RecordState {
    /// All states in lifecycle order
    pub const ALL: [RecordState; 7] = [
        RecordState::Dropped,
        RecordState::Reading,
        RecordState::Read,
        RecordState::Uploading,
        RecordState::Optimizing,
        RecordState::Finished,
        RecordState::Error,
    ];

    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Dropped => "dropped",
            RecordState::Reading => "reading",
            RecordState::Read => "read",
            RecordState::Uploading => "uploading",
            RecordState::Optimizing => "optimizing",
            RecordState::Finished => "finished",
            RecordState::Error => "error",
        }
    }

    /// No transition leaves this state
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordState::Finished | RecordState::Error)
    }

    /// Per-record progress for display
    #[inline]
    #[must_use]
    pub fn progress(&self) -> u8 {
        match self {
            RecordState::Uploading => 33,
            RecordState::Optimizing => 66,
            RecordState::Finished => 100,
            _ => 0,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery formats requested from the media service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Service-chosen optimized delivery in the source format
    Optimized,
    /// AVIF
    Avif,
    /// WebP
    Webp,
    /// JPEG
    Jpg,
    /// JPEG XL
    Jxl,
}

impl Format {
    /// All formats in slot order
    pub const ALL: [Format; 5] = [
        Format::Optimized,
        Format::Avif,
        Format::Webp,
        Format::Jpg,
        Format::Jxl,
    ];

    /// Formats offered as explicit conversions
    pub const CONVERSIONS: [Format; 4] = [Format::Avif, Format::Webp, Format::Jpg, Format::Jxl];

    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Optimized => "optimized",
            Format::Avif => "avif",
            Format::Webp => "webp",
            Format::Jpg => "jpg",
            Format::Jxl => "jxl",
        }
    }

    /// Format parameter for delivery URLs; `None` keeps the source format
    #[inline]
    #[must_use]
    pub fn delivery_format(&self) -> Option<&'static str> {
        match self {
            Format::Optimized => None,
            other => Some(other.as_str()),
        }
    }

    #[inline]
    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown format: {s}"))
    }
}

/// One transcoded delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// Delivery URL
    pub url: String,
    /// Measured size in bytes, when fetched
    pub size: Option<u64>,
    /// Fetched bytes, when kept
    pub bytes: Option<Bytes>,
}

impl Variant {
    /// Unmeasured variant
    #[inline]
    #[must_use]
    pub fn unmeasured(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            size: None,
            bytes: None,
        }
    }

    /// Variant measured from fetched bytes
    #[inline]
    #[must_use]
    pub fn measured(url: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            url: url.into(),
            size: Some(bytes.len() as u64),
            bytes: Some(bytes),
        }
    }
}

/// Fixed mapping from [`Format`] to an optional [`Variant`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantSet {
    slots: [Option<Variant>; 5],
}

impl VariantSet {
    /// Empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Variant for a format
    #[inline]
    #[must_use]
    pub fn get(&self, format: Format) -> Option<&Variant> {
        self.slots[format.slot()].as_ref()
    }

    /// Mutable variant for a format
    #[inline]
    pub fn get_mut(&mut self, format: Format) -> Option<&mut Variant> {
        self.slots[format.slot()].as_mut()
    }

    /// Set the variant for a format, returning the previous one
    #[inline]
    pub fn insert(&mut self, format: Format, variant: Variant) -> Option<Variant> {
        self.slots[format.slot()].replace(variant)
    }

    /// Builder-style insert
    #[inline]
    #[must_use]
    pub fn with(mut self, format: Format, variant: Variant) -> Self {
        self.insert(format, variant);
        self
    }

    /// No format populated
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Number of populated formats
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Populated formats in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Format, &Variant)> {
        Format::ALL
            .into_iter()
            .zip(self.slots.iter())
            .filter_map(|(format, slot)| slot.as_ref().map(|v| (format, v)))
    }

    /// Drop every variant
    #[inline]
    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}

/// Result of a remote upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    /// Remote identifier used to build delivery URLs
    pub remote_id: String,
    /// Format detected by the service (e.g. `png`)
    pub format: String,
    /// Pixel width
    pub width: u32,
    /// Pixel height
    pub height: u32,
    /// Stored size in bytes
    pub bytes: u64,
    /// Filename as seen by the service, without extension
    pub original_filename: String,
    /// Canonical delivery URL of the stored original
    #[serde(default)]
    pub secure_url: Option<String>,
}

/// Local preview of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    /// `data:` URI of the thumbnail
    pub data_uri: String,
    /// Intrinsic pixel width of the source
    pub width: u32,
    /// Intrinsic pixel height of the source
    pub height: u32,
}

/// Immutable handle to the original bytes of a submitted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Original filename
    pub name: String,
    /// Declared media type; may be empty when the runtime could not sniff it
    pub mime: String,
    /// File contents
    pub bytes: Bytes,
}

impl SourceFile {
    /// Create from parts
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk; the media type is left for ingestion to resolve
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, String::new(), bytes))
    }

    /// Size in bytes
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercase extension including the dot, if any
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
    }
}

/// One submitted file moving through the pipeline
#[derive(Debug, Clone)]
pub struct UploadRecord {
    /// Session-unique id
    pub id: RecordId,
    /// Original filename
    pub name: String,
    /// Original size in bytes
    pub original_size: u64,
    /// Original bytes
    pub source: Arc<SourceFile>,
    /// Lifecycle state
    pub state: RecordState,
    /// Local preview
    pub preview: Option<Preview>,
    /// Remote upload result
    pub remote: Option<RemoteAsset>,
    /// Deliveries; populated only when finished
    pub variants: VariantSet,
    /// User-facing failure reasons in order of occurrence
    pub errors: Vec<String>,
}

impl UploadRecord {
    /// Fresh record in `dropped`
    #[must_use]
    pub fn new(id: RecordId, source: Arc<SourceFile>) -> Self {
        Self {
            id,
            name: source.name.clone(),
            original_size: source.size(),
            source,
            state: RecordState::Dropped,
            preview: None,
            remote: None,
            variants: VariantSet::new(),
            errors: Vec::new(),
        }
    }

    /// Intrinsic dimensions from the preview
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.preview.as_ref().map(|p| (p.width, p.height))
    }

    /// Carries at least one error
    #[inline]
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Name without extension, used for downloads and archive members
    #[must_use]
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Extension used when saving a format of this record
    #[must_use]
    pub fn extension_for(&self, format: Format) -> String {
        match format {
            Format::Optimized => self
                .remote
                .as_ref()
                .map(|r| r.format.clone())
                .unwrap_or_else(|| "img".to_string()),
            other => other.as_str().to_string(),
        }
    }

    /// Download filename for a format
    #[must_use]
    pub fn download_name(&self, format: Format) -> String {
        let base = self
            .remote
            .as_ref()
            .map(|r| r.original_filename.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.stem());
        format!("{base}.{}", self.extension_for(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> UploadRecord {
        let source = Arc::new(SourceFile::new(name, "image/png", vec![0u8; 4]));
        UploadRecord::new(RecordId::derive(1, name), source)
    }

    #[test]
    fn record_id_derivation() {
        assert_eq!(RecordId::derive(1700, "cat.png").as_str(), "1700-cat.png");
    }

    #[test]
    fn variant_set_slots() {
        let mut set = VariantSet::new();
        assert!(set.is_empty());

        set.insert(Format::Avif, Variant::unmeasured("u1"));
        set.insert(Format::Optimized, Variant::measured("u0", Bytes::from_static(b"abc")));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(Format::Optimized).and_then(|v| v.size), Some(3));
        assert!(set.get(Format::Jxl).is_none());

        let order: Vec<Format> = set.iter().map(|(f, _)| f).collect();
        assert_eq!(order, vec![Format::Optimized, Format::Avif]);

        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("WEBP".parse::<Format>(), Ok(Format::Webp));
        assert!("gif".parse::<Format>().is_err());
        assert_eq!(Format::Optimized.delivery_format(), None);
        assert_eq!(Format::Jpg.delivery_format(), Some("jpg"));
    }

    #[test]
    fn new_record_is_dropped() {
        let r = record("photo.jpeg");
        assert_eq!(r.state, RecordState::Dropped);
        assert_eq!(r.original_size, 4);
        assert!(r.variants.is_empty());
        assert!(!r.has_errors());
        assert_eq!(r.stem(), "photo");
    }

    #[test]
    fn download_name_prefers_remote_filename() {
        let mut r = record("photo.jpeg");
        assert_eq!(r.download_name(Format::Webp), "photo.webp");

        r.remote = Some(RemoteAsset {
            remote_id: "uploads/abc".into(),
            format: "jpg".into(),
            width: 10,
            height: 10,
            bytes: 4,
            original_filename: "holiday".into(),
            secure_url: None,
        });
        assert_eq!(r.download_name(Format::Optimized), "holiday.jpg");
        assert_eq!(r.download_name(Format::Avif), "holiday.avif");
    }

    #[test]
    fn per_record_progress() {
        assert_eq!(RecordState::Read.progress(), 0);
        assert_eq!(RecordState::Uploading.progress(), 33);
        assert_eq!(RecordState::Optimizing.progress(), 66);
        assert_eq!(RecordState::Finished.progress(), 100);
    }
}
