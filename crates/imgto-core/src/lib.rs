//! imgto core - image optimization pipeline
//!
//! Orchestrates submitted images through:
//! - Ingestion with type, size and count validation
//! - Local preview decoding
//! - Concurrency-limited upload and variant generation on a hosted media
//!   service
//! - Aggregate progress derived from record snapshots
//! - Zip archives and individual downloads of the results
//!
//! # Example
//!
//! ```rust,ignore
//! use imgto_core::prelude::*;
//!
//! # async fn example(media: Arc<dyn MediaService>, fetcher: Arc<dyn Fetcher>) -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(PipelineConfig::default(), media, fetcher);
//! session.add_files([SourceFile::from_path("cat.png".as_ref()).await?]);
//! session.process().await?;
//!
//! println!("{}%", session.progress().percent);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod archive;
pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod ingest;
pub mod media;
pub mod preview;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod util;

// Re-exports for convenience
pub use archive::{entries_for, ArchiveAssembler, ArchiveEntry};
pub use config::{AcceptList, PipelineConfig};
pub use convert::{CommandConverter, ConvertCommand};
pub use download::{DownloadSource, Downloader};
pub use error::{
    ArchiveError, ConfigError, DecodeError, DownloadError, Error, FetchError, StoreError,
    TransitionError, UploadError, ValidationError,
};
pub use ingest::Ingestor;
pub use media::{DeliveryOptions, Fetcher, MediaService, UploadRequest};
pub use preview::{ImageDecoder, PreviewDecoder, PreviewReader, RasterConverter};
pub use progress::{AggregateProgress, GlobalState};
pub use scheduler::{Notice, RunSummary, UploadScheduler};
pub use session::Session;
pub use store::{RecordStore, Snapshot};
pub use types::{
    Format, Preview, RecordId, RecordState, RemoteAsset, SourceFile, UploadRecord, Variant,
    VariantSet,
};
pub use util::{format_bytes, ByteFormat, ByteUnit};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a session
    pub use crate::{
        AggregateProgress, Error, Fetcher, Format, GlobalState, MediaService, PipelineConfig,
        RecordState, Session, SourceFile, UploadRecord,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
