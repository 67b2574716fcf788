//! Archive assembler
//!
//! Fetches the optimized delivery of every finished record and packs them
//! into one deflate-compressed zip. A single failed fetch abandons the whole
//! archive; there is no partial result.

use crate::error::ArchiveError;
use crate::media::Fetcher;
use crate::types::{Format, UploadRecord};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// One archive member to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Delivery URL
    pub url: String,
    /// Member name without extension
    pub name: String,
    /// Extension, usually the remote-detected format
    pub format: String,
}

impl ArchiveEntry {
    /// `{name}.{format}`
    #[inline]
    #[must_use]
    pub fn member_name(&self) -> String {
        format!("{}.{}", self.name, self.format)
    }
}

/// Entries for every record that has an optimized variant, in order
#[must_use]
pub fn entries_for<'a>(records: impl IntoIterator<Item = &'a UploadRecord>) -> Vec<ArchiveEntry> {
    records
        .into_iter()
        .filter_map(|record| {
            let variant = record.variants.get(Format::Optimized)?;
            Some(ArchiveEntry {
                url: variant.url.clone(),
                name: record.stem(),
                format: record.extension_for(Format::Optimized),
            })
        })
        .collect()
}

/// Builds zip archives from delivery URLs
#[derive(Clone)]
pub struct ArchiveAssembler {
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for ArchiveAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveAssembler").finish_non_exhaustive()
    }
}

impl ArchiveAssembler {
    /// Create an assembler
    #[inline]
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch every entry concurrently and pack the results
    pub async fn build(&self, entries: &[ArchiveEntry]) -> Result<Bytes, ArchiveError> {
        if entries.is_empty() {
            return Err(ArchiveError::Empty);
        }
        tracing::info!(count = entries.len(), "assembling archive");

        let names = unique_member_names(entries);
        let fetches = entries.iter().zip(names).map(|(entry, name)| async move {
            match self.fetcher.fetch(&entry.url).await {
                Ok(bytes) => Ok((name, bytes)),
                Err(source) => Err(ArchiveError::Fetch { name, source }),
            }
        });
        let members = futures::future::try_join_all(fetches).await.map_err(|e| {
            tracing::error!(error = %e, "archive fetch failed");
            e
        })?;

        let archive = tokio::task::spawn_blocking(move || pack(&members))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))??;
        tracing::info!(size = archive.len(), "archive ready");
        Ok(archive)
    }
}

/// Member names with ` (n)` appended until each is unique
fn unique_member_names(entries: &[ArchiveEntry]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(entries.len());
    entries
        .iter()
        .map(|entry| {
            let mut name = entry.member_name();
            let mut n = 0;
            while taken.contains(&name) {
                n += 1;
                name = format!("{} ({n}).{}", entry.name, entry.format);
            }
            taken.insert(name.clone());
            name
        })
        .collect()
}

fn pack(members: &[(String, Bytes)]) -> Result<Bytes, ArchiveError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in members {
        zip.start_file(name.as_str(), options)
            .map_err(|e| ArchiveError::Zip(format!("start {name}: {e}")))?;
        zip.write_all(bytes)
            .map_err(|e| ArchiveError::Zip(format!("write {name}: {e}")))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| ArchiveError::Zip(format!("finish: {e}")))?;
    Ok(Bytes::from(cursor.into_inner()))
}
