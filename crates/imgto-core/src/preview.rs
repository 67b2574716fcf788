//! Local preview reader
//!
//! Decodes every `dropped` record into a PNG thumbnail and its intrinsic
//! dimensions. Decoding is CPU bound, so it runs on the blocking pool; all
//! records claimed by one run are decoded concurrently, optionally capped
//! to bound peak memory.
//!
//! Types listed in `convert_before_preview` go through a [`RasterConverter`]
//! first, by default [`CommandConverter::system`]. A record whose type no
//! converter can handle fails with [`DecodeError::ConverterUnavailable`].

use crate::config::PipelineConfig;
use crate::convert::CommandConverter;
use crate::error::{DecodeError, StoreError};
use crate::state_machine::validate_transition;
use crate::store::RecordStore;
use crate::types::{Preview, RecordState, UploadRecord};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{GenericImageView, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Decodes displayable bytes into a preview
pub trait PreviewDecoder: Send + Sync {
    /// Decode `bytes`, producing a thumbnail no larger than `max_dimension`
    /// on either edge and the intrinsic size of the image
    fn decode(&self, bytes: &[u8], max_dimension: u32) -> Result<Preview, DecodeError>;
}

/// Converts container formats into a raster the decoder understands
pub trait RasterConverter: Send + Sync {
    /// Convert `bytes` of type `mime` into PNG or JPEG bytes
    fn convert(&self, mime: &str, bytes: &[u8]) -> Result<Vec<u8>, DecodeError>;
}

/// [`PreviewDecoder`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl PreviewDecoder for ImageDecoder {
    fn decode(&self, bytes: &[u8], max_dimension: u32) -> Result<Preview, DecodeError> {
        let img = image::load_from_memory(bytes).map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        let (width, height) = img.dimensions();

        let thumb = if width > max_dimension || height > max_dimension {
            img.thumbnail(max_dimension, max_dimension)
        } else {
            img
        };

        let mut buf = Cursor::new(Vec::new());
        thumb
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| DecodeError::Encode(e.to_string()))?;

        Ok(Preview {
            data_uri: format!("data:image/png;base64,{}", STANDARD.encode(buf.get_ref())),
            width,
            height,
        })
    }
}

/// Moves `dropped` records through `reading` to `read` or `error`
#[derive(Clone)]
pub struct PreviewReader {
    store: Arc<RecordStore>,
    config: Arc<PipelineConfig>,
    decoder: Arc<dyn PreviewDecoder>,
    converter: Arc<dyn RasterConverter>,
    limiter: Option<Arc<Semaphore>>,
}

impl std::fmt::Debug for PreviewReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewReader")
            .field("limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl PreviewReader {
    /// Create a reader over a store
    #[must_use]
    pub fn new(store: Arc<RecordStore>, config: Arc<PipelineConfig>) -> Self {
        let limiter = config
            .preview_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            store,
            config,
            decoder: Arc::new(ImageDecoder),
            converter: Arc::new(CommandConverter::system()),
            limiter,
        }
    }

    /// With a custom decoder
    #[inline]
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn PreviewDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the converter for `convert_before_preview` types
    #[inline]
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn RasterConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Read every record currently in `dropped`.
    ///
    /// Returns how many records were claimed. Completes when all of them have
    /// left `reading`.
    pub async fn run(&self) -> Result<usize, StoreError> {
        let claimed = self
            .store
            .claim(RecordState::Dropped, RecordState::Reading, |_| true)?;
        let count = claimed.len();
        if count == 0 {
            return Ok(0);
        }
        tracing::info!(count, "reading previews");

        let mut tasks = JoinSet::new();
        for record in claimed {
            tasks.spawn(self.clone().read_one(record));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "preview task failed");
            }
        }
        Ok(count)
    }

    async fn read_one(self, record: UploadRecord) {
        let _permit = match &self.limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        };

        let needs_conversion = self.config.needs_conversion(&record.source.mime);
        let decoder = self.decoder.clone();
        let converter = self.converter.clone();
        let source = record.source.clone();
        let max = self.config.preview_max_dimension;

        let result = tokio::task::spawn_blocking(move || {
            render(
                decoder.as_ref(),
                converter.as_ref(),
                needs_conversion,
                &source.mime,
                &source.bytes,
                max,
            )
        })
        .await
        .unwrap_or_else(|e| Err(DecodeError::Task(e.to_string())));

        let outcome = match result {
            Ok(preview) => self.store.update(&record.id, |r| {
                let to = if r.has_errors() {
                    RecordState::Error
                } else {
                    RecordState::Read
                };
                validate_transition(r.state, to)?;
                r.state = to;
                r.preview = Some(preview);
                Ok(to)
            }),
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "preview decode failed");
                self.store
                    .fail(&record.id, Some(e.user_message()))
                    .map(|()| RecordState::Error)
            }
        };

        match outcome {
            Ok(state) => tracing::debug!(id = %record.id, %state, "preview read"),
            Err(e) => tracing::warn!(id = %record.id, error = %e, "record changed while reading"),
        }
    }
}

fn render(
    decoder: &dyn PreviewDecoder,
    converter: &dyn RasterConverter,
    needs_conversion: bool,
    mime: &str,
    bytes: &[u8],
    max_dimension: u32,
) -> Result<Preview, DecodeError> {
    if !needs_conversion {
        return decoder.decode(bytes, max_dimension);
    }
    let raster = converter.convert(mime, bytes)?;
    decoder.decode(&raster, max_dimension)
}
