//! Testing utilities for imgto workspace
//!
//! Shared fakes and fixtures:
//! - [`FakeMediaService`], a scripted media service and fetcher that tracks
//!   in-flight uploads
//! - PNG fixtures

#![allow(missing_docs)]

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use imgto_core::error::{FetchError, UploadError};
use imgto_core::media::{DeliveryOptions, Fetcher, MediaService, UploadRequest};
use imgto_core::types::{RemoteAsset, SourceFile};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted behaviour for one filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Script {
    #[default]
    Succeed,
    RejectContent,
    TooSmall,
    FailUpload,
    FetchUnauthorized,
    FetchFails,
}

/// In-memory media service; also serves delivery URLs as a [`Fetcher`]
#[derive(Debug)]
pub struct FakeMediaService {
    scripts: Mutex<HashMap<String, Script>>,
    delay: Duration,
    payload: Bytes,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    uploads: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
}

impl Default for FakeMediaService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMediaService {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            payload: Bytes::from_static(b"optimized-bytes"),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Hold every upload for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Body returned for every fetch
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn script(self, filename: &str, script: Script) -> Self {
        self.scripts.lock().insert(filename.to_string(), script);
        self
    }

    /// Highest number of uploads observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Filenames in the order their uploads started
    pub fn upload_order(&self) -> Vec<String> {
        self.uploads.lock().clone()
    }

    /// URLs fetched so far
    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }

    fn script_for(&self, filename: &str) -> Script {
        self.scripts.lock().get(filename).copied().unwrap_or_default()
    }
}

#[async_trait]
impl MediaService for FakeMediaService {
    async fn upload(&self, request: UploadRequest) -> Result<RemoteAsset, UploadError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.uploads.lock().push(request.filename.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.script_for(&request.filename) {
            Script::RejectContent => return Err(UploadError::Rejected),
            Script::TooSmall => return Err(UploadError::ResolutionTooSmall),
            Script::FailUpload => return Err(UploadError::Failed("scripted failure".into())),
            _ => {}
        }

        let path = Path::new(&request.filename);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());
        Ok(RemoteAsset {
            remote_id: request.filename.clone(),
            format,
            width: 16,
            height: 16,
            bytes: request.bytes.len() as u64,
            original_filename: stem,
            secure_url: None,
        })
    }

    fn delivery_url(&self, remote_id: &str, options: &DeliveryOptions) -> String {
        let format = options.format.delivery_format().unwrap_or("default");
        format!("https://fake.test/f_{format},q_{}/{remote_id}", options.quality)
    }
}

#[async_trait]
impl Fetcher for FakeMediaService {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.fetches.lock().push(url.to_string());
        let remote_id = url.rsplit('/').next().unwrap_or_default();
        match self.script_for(remote_id) {
            Script::FetchUnauthorized => Err(FetchError::Unauthorized),
            Script::FetchFails => Err(FetchError::Status(500)),
            _ => Ok(self.payload.clone()),
        }
    }
}

/// Encoded black PNG
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// PNG source file
pub fn png_file(name: &str) -> SourceFile {
    SourceFile::new(name, "image/png", png_bytes(32, 32))
}

/// HEIC source file with no declared type, as some runtimes report them
pub fn heic_file(name: &str) -> SourceFile {
    SourceFile::new(name, "", b"\0\0\0\x18ftypheic".to_vec())
}
