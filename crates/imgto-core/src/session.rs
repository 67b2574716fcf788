//! Session
//!
//! One explicit object per user session. It owns the record store and wires
//! the stages together:
//! - [`Session::add_files`] runs ingestion
//! - [`Session::process`] runs the preview reader, then the scheduler
//! - [`Session::progress`] derives aggregate progress from the current
//!   snapshot
//! - [`Session::archive`] and [`Session::download_variant`] hand results out

use crate::archive::{entries_for, ArchiveAssembler, ArchiveEntry};
use crate::config::PipelineConfig;
use crate::download::{DownloadSource, Downloader};
use crate::error::{ArchiveError, Error, StoreError};
use crate::ingest::Ingestor;
use crate::media::{Fetcher, MediaService};
use crate::preview::{PreviewDecoder, PreviewReader, RasterConverter};
use crate::progress::AggregateProgress;
use crate::scheduler::{Notice, RunSummary, UploadScheduler};
use crate::store::{RecordStore, Snapshot};
use crate::types::{Format, RecordId, SourceFile};
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, watch};

/// A running optimization session
#[derive(Debug)]
pub struct Session {
    config: Arc<PipelineConfig>,
    store: Arc<RecordStore>,
    ingestor: Mutex<Ingestor>,
    reader: PreviewReader,
    scheduler: UploadScheduler,
    archiver: ArchiveAssembler,
    downloader: Downloader,
}

impl Session {
    /// Create a session against a media service
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        media: Arc<dyn MediaService>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(RecordStore::new());
        Self {
            ingestor: Mutex::new(Ingestor::new(config.clone())),
            reader: PreviewReader::new(store.clone(), config.clone()),
            scheduler: UploadScheduler::new(store.clone(), config.clone(), media, fetcher.clone()),
            archiver: ArchiveAssembler::new(fetcher.clone()),
            downloader: Downloader::new(fetcher),
            config,
            store,
        }
    }

    /// Replace the converter for `convert_before_preview` types
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn RasterConverter>) -> Self {
        self.reader = self.reader.with_converter(converter);
        self
    }

    /// Replace the preview decoder
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn PreviewDecoder>) -> Self {
        self.reader = self.reader.with_decoder(decoder);
        self
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest files, returning the new record ids in order
    pub fn add_files(&self, files: impl IntoIterator<Item = SourceFile>) -> Vec<RecordId> {
        let timestamp = now_ms();
        let mut ingestor = self.ingestor.lock();
        let ids: Vec<RecordId> = files
            .into_iter()
            .map(|file| self.store.push(ingestor.accept(file, timestamp)))
            .collect();
        tracing::info!(count = ids.len(), total = ingestor.count(), "files added");
        ids
    }

    /// Whether the file limit is reached
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.ingestor.lock().is_full()
    }

    /// Read previews for every new record
    pub async fn read_previews(&self) -> Result<usize, StoreError> {
        self.reader.run().await
    }

    /// Upload every record waiting in `read`
    pub async fn upload(&self) -> RunSummary {
        self.scheduler.run().await
    }

    /// Read previews, then upload everything eligible
    pub async fn process(&self) -> Result<RunSummary, Error> {
        self.read_previews().await?;
        Ok(self.upload().await)
    }

    /// Current record collection
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Snapshot after every mutation
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.store.subscribe()
    }

    /// Transient failure notices
    #[inline]
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.scheduler.notices()
    }

    /// Aggregate progress of the current snapshot
    #[must_use]
    pub fn progress(&self) -> AggregateProgress {
        AggregateProgress::of(&self.store.snapshot())
    }

    /// Archive entries for every finished record
    #[must_use]
    pub fn archive_entries(&self) -> Vec<ArchiveEntry> {
        entries_for(&self.store.snapshot())
    }

    /// Zip every finished record's optimized variant
    pub async fn archive(&self) -> Result<Bytes, ArchiveError> {
        self.archiver.build(&self.archive_entries()).await
    }

    /// Measure one variant if needed and save it into `dir`
    pub async fn download_variant(
        &self,
        id: &RecordId,
        format: Format,
        dir: &Path,
    ) -> Result<PathBuf, Error> {
        let variant = self.scheduler.measure(id, format).await?;
        let record = self
            .store
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let source = match variant.bytes {
            Some(bytes) => DownloadSource::Bytes(bytes),
            None => DownloadSource::Url(variant.url),
        };
        Ok(self
            .downloader
            .save(source, dir, &record.download_name(format))
            .await?)
    }

    /// Save arbitrary bytes or a URL into `dir`
    pub async fn download(
        &self,
        source: DownloadSource,
        dir: &Path,
        filename: &str,
    ) -> Result<PathBuf, Error> {
        Ok(self.downloader.save(source, dir, filename).await?)
    }

    /// Drop all records and start over; issued ids stay reserved
    pub fn reset(&self) {
        self.store.clear();
        self.ingestor.lock().reset();
        self.scheduler.reset();
        tracing::info!("session reset");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
