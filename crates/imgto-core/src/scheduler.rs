//! Upload/transform scheduler
//!
//! Drives `read` records through the remote service:
//! - Admission through a FIFO semaphore, at most `upload_concurrency` uploads
//!   in flight; a record becomes `uploading` only once admitted
//! - One upload attempt with the eager directive, then `optimizing`
//! - Delivery URLs for every [`Format`], with the optimized one fetched to
//!   measure its size, then `finished`
//!
//! Any failure moves only the affected record to `error` and publishes a
//! [`Notice`]. Siblings are never touched.

use crate::config::PipelineConfig;
use crate::error::{Error, StoreError};
use crate::media::{DeliveryOptions, Fetcher, MediaService, UploadRequest};
use crate::state_machine::validate_transition;
use crate::store::RecordStore;
use crate::types::{Format, RecordId, RecordState, RemoteAsset, Variant, VariantSet};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Capacity of the notice channel; slow receivers lose the oldest notices
const NOTICE_CAPACITY: usize = 64;

/// Transient user-facing failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Affected record
    pub id: RecordId,
    /// Record filename
    pub name: String,
    /// User-facing message
    pub message: String,
}

/// Counts from one [`UploadScheduler::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records admitted to upload
    pub admitted: usize,
    /// Records that reached `finished`
    pub finished: usize,
    /// Records that ended in `error`
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    Failed,
    Skipped,
}

/// Concurrency-limited upload and variant pipeline
#[derive(Clone)]
pub struct UploadScheduler {
    store: Arc<RecordStore>,
    config: Arc<PipelineConfig>,
    media: Arc<dyn MediaService>,
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<Semaphore>,
    claimed: Arc<Mutex<HashSet<RecordId>>>,
    notices: broadcast::Sender<Notice>,
}

impl std::fmt::Debug for UploadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadScheduler")
            .field("concurrency", &self.config.upload_concurrency)
            .field("available", &self.limiter.available_permits())
            .field("claimed", &self.claimed.lock().len())
            .finish_non_exhaustive()
    }
}

impl UploadScheduler {
    /// Create a scheduler over a store
    #[must_use]
    pub fn new(
        store: Arc<RecordStore>,
        config: Arc<PipelineConfig>,
        media: Arc<dyn MediaService>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.upload_concurrency.max(1)));
        let (notices, _rx) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            store,
            config,
            media,
            fetcher,
            limiter,
            claimed: Arc::new(Mutex::new(HashSet::new())),
            notices,
        }
    }

    /// Receive notices for failures published from now on
    #[inline]
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Forget which records were claimed
    pub fn reset(&self) {
        self.claimed.lock().clear();
    }

    /// Schedule every `read` record not already claimed by an earlier run.
    ///
    /// Admission follows collection order. Completes once every admitted
    /// record reached a terminal state.
    pub async fn run(&self) -> RunSummary {
        let queued: Vec<RecordId> = {
            let mut claimed = self.claimed.lock();
            self.store
                .snapshot()
                .iter()
                .filter(|r| r.state == RecordState::Read && claimed.insert(r.id.clone()))
                .map(|r| r.id.clone())
                .collect()
        };
        let mut summary = RunSummary::default();
        if queued.is_empty() {
            return summary;
        }
        tracing::info!(count = queued.len(), "scheduling uploads");

        let mut tasks = JoinSet::new();
        for id in queued {
            let Ok(permit) = self.limiter.clone().acquire_owned().await else {
                tracing::error!("upload limiter closed");
                break;
            };
            if let Err(e) = self.store.transition(&id, RecordState::Uploading) {
                tracing::warn!(%id, error = %e, "record not admitted");
                continue;
            }
            tracing::debug!(%id, "admitted");
            summary.admitted += 1;
            tasks.spawn(self.clone().process(id, permit));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Outcome::Finished) => summary.finished += 1,
                Ok(Outcome::Failed) => summary.failed += 1,
                Ok(Outcome::Skipped) => {}
                Err(e) => tracing::error!(error = %e, "upload task failed"),
            }
        }
        tracing::info!(
            admitted = summary.admitted,
            finished = summary.finished,
            failed = summary.failed,
            "uploads complete"
        );
        summary
    }

    /// Fetch an unmeasured variant and record its size and bytes.
    ///
    /// Already measured variants with bytes are returned as is.
    pub async fn measure(&self, id: &RecordId, format: Format) -> Result<Variant, Error> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let variant = record
            .variants
            .get(format)
            .cloned()
            .ok_or_else(|| StoreError::MissingVariant {
                id: id.clone(),
                format,
            })?;
        if variant.bytes.is_some() {
            return Ok(variant);
        }

        let bytes = self.fetcher.fetch(&variant.url).await?;
        let measured = Variant::measured(variant.url, bytes);
        tracing::debug!(%id, %format, size = ?measured.size, "variant measured");

        self.store.update(id, |r| {
            let slot = r
                .variants
                .get_mut(format)
                .ok_or_else(|| StoreError::MissingVariant {
                    id: r.id.clone(),
                    format,
                })?;
            *slot = measured.clone();
            Ok(())
        })?;
        Ok(measured)
    }

    async fn process(self, id: RecordId, permit: OwnedSemaphorePermit) -> Outcome {
        let Some(record) = self.store.get(&id) else {
            return Outcome::Skipped;
        };

        let request = UploadRequest {
            filename: record.name.clone(),
            mime: record.source.mime.clone(),
            bytes: record.source.bytes.clone(),
            eager: self.config.eager.clone(),
        };
        let remote = match self.media.upload(request).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(%id, error = %e, "upload failed");
                let outcome = self.reject(&id, &record.name, e.user_message());
                drop(permit);
                return outcome;
            }
        };

        let attached = self.store.update(&id, |r| {
            validate_transition(r.state, RecordState::Optimizing)?;
            r.state = RecordState::Optimizing;
            r.remote = Some(remote.clone());
            Ok(())
        });
        drop(permit);
        if let Err(e) = attached {
            tracing::warn!(%id, error = %e, "record changed during upload");
            return Outcome::Skipped;
        }
        tracing::debug!(%id, remote_id = %remote.remote_id, "uploaded");

        let urls = self.delivery_urls(&remote);
        let optimized_url = urls[0].1.clone();
        let bytes = match self.fetcher.fetch(&optimized_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%id, error = %e, "optimized fetch failed");
                return self.reject(&id, &record.name, e.user_message());
            }
        };

        let mut variants = VariantSet::new();
        for (format, url) in urls {
            let variant = if format == Format::Optimized {
                Variant::measured(url, bytes.clone())
            } else {
                Variant::unmeasured(url)
            };
            variants.insert(format, variant);
        }

        match self.store.finish(&id, variants) {
            Ok(()) => {
                tracing::info!(%id, original = record.original_size, optimized = bytes.len(), "finished");
                Outcome::Finished
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "record changed during optimization");
                Outcome::Skipped
            }
        }
    }

    /// Delivery URLs in [`Format::ALL`] order
    fn delivery_urls(&self, remote: &RemoteAsset) -> Vec<(Format, String)> {
        Format::ALL
            .into_iter()
            .map(|format| {
                let options = DeliveryOptions::new(format, self.config.delivery_quality.as_str());
                (format, self.media.delivery_url(&remote.remote_id, &options))
            })
            .collect()
    }

    fn reject(&self, id: &RecordId, name: &str, message: &str) -> Outcome {
        if let Err(e) = self.store.fail(id, Some(message)) {
            tracing::warn!(%id, error = %e, "unable to record failure");
            return Outcome::Skipped;
        }
        // no receivers is fine
        let _ = self.notices.send(Notice {
            id: id.clone(),
            name: name.to_string(),
            message: message.to_string(),
        });
        Outcome::Failed
    }
}
