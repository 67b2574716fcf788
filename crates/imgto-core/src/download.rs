//! Download utility
//!
//! Saves a URL or an in-memory buffer under a filename. Data is written to a
//! temporary file in the target directory and persisted under the final name
//! only once complete, so a failed save leaves nothing behind. Existing files
//! are never replaced: a taken name gets ` (n)` before its extension.

use crate::error::DownloadError;
use crate::media::Fetcher;
use bytes::Bytes;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What to save
#[derive(Debug, Clone)]
pub enum DownloadSource {
    /// Fetch this URL first
    Url(String),
    /// Save these bytes directly
    Bytes(Bytes),
}

/// Saves downloads into a directory
#[derive(Clone)]
pub struct Downloader {
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader").finish_non_exhaustive()
    }
}

impl Downloader {
    /// Create a downloader
    #[inline]
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Save `source` into `dir` as `filename`, returning the final path
    pub async fn save(
        &self,
        source: DownloadSource,
        dir: &Path,
        filename: &str,
    ) -> Result<PathBuf, DownloadError> {
        let name = sanitize_filename(filename)
            .ok_or_else(|| DownloadError::InvalidFilename(filename.to_string()))?;

        let bytes = match source {
            DownloadSource::Bytes(bytes) => bytes,
            DownloadSource::Url(url) => self.fetcher.fetch(&url).await?,
        };

        let dir = dir.to_path_buf();
        let path = tokio::task::spawn_blocking(move || write_atomic(&dir, &name, &bytes))
            .await
            .map_err(|e| DownloadError::Task(e.to_string()))??;

        tracing::debug!(path = %path.display(), "saved");
        Ok(path)
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, DownloadError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;

    let mut n = 0;
    loop {
        let target = dir.join(numbered(name, n));
        match tmp.persist_noclobber(&target) {
            Ok(_) => return Ok(target),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                tmp = e.file;
                n += 1;
            }
            Err(e) => return Err(DownloadError::Io(e.error)),
        }
    }
}

/// `name` with ` (n)` before its extension; `n == 0` is the name itself
fn numbered(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{name} ({n})"),
    }
}

/// Strip path components and control characters.
///
/// Returns `None` when nothing usable is left.
#[must_use]
pub fn sanitize_filename(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;

    struct Static;

    #[async_trait]
    impl Fetcher for Static {
        async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
            if url == "denied" {
                return Err(FetchError::Unauthorized);
            }
            Ok(Bytes::from_static(b"remote"))
        }
    }

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize_filename("a.webp").as_deref(), Some("a.webp"));
        assert_eq!(sanitize_filename("../etc/passwd").as_deref(), Some("_etc_passwd"));
        assert_eq!(sanitize_filename("  "), None);
        assert_eq!(sanitize_filename("/"), None);
    }

    #[tokio::test]
    async fn saves_buffer_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Arc::new(Static));

        let p = downloader
            .save(DownloadSource::Bytes(Bytes::from_static(b"local")), dir.path(), "a.jpg")
            .await
            .unwrap();
        assert_eq!(std::fs::read(&p).unwrap(), b"local");

        let p = downloader
            .save(DownloadSource::Url("x".into()), dir.path(), "b.avif")
            .await
            .unwrap();
        assert_eq!(std::fs::read(&p).unwrap(), b"remote");
    }

    #[test]
    fn numbering_keeps_extension() {
        assert_eq!(numbered("a.png", 0), "a.png");
        assert_eq!(numbered("a.png", 2), "a (2).png");
        assert_eq!(numbered("archive", 1), "archive (1)");
    }

    #[tokio::test]
    async fn existing_files_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Arc::new(Static));

        let mut paths = Vec::new();
        for body in [&b"first"[..], b"second", b"third"] {
            let p = downloader
                .save(DownloadSource::Bytes(Bytes::copy_from_slice(body)), dir.path(), "a.png")
                .await
                .unwrap();
            paths.push(p);
        }

        assert_eq!(paths[0], dir.path().join("a.png"));
        assert_eq!(paths[1], dir.path().join("a (1).png"));
        assert_eq!(paths[2], dir.path().join("a (2).png"));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"first");
        assert_eq!(std::fs::read(&paths[2]).unwrap(), b"third");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Arc::new(Static));
        let err = downloader
            .save(DownloadSource::Url("denied".into()), dir.path(), "c.png")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Fetch(FetchError::Unauthorized)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
