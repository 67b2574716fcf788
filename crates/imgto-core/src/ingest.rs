//! File ingestion
//!
//! Turns submitted files into records. Validation never throws: a file that
//! fails a check still becomes a record, annotated with one message per
//! failed check, so the caller can surface it.

use crate::config::PipelineConfig;
use crate::error::ValidationError;
use crate::types::{RecordId, SourceFile, UploadRecord};
use std::collections::HashSet;
use std::sync::Arc;

/// Validates files and mints session-unique ids
#[derive(Debug)]
pub struct Ingestor {
    config: Arc<PipelineConfig>,
    /// Records created so far, rejected ones included
    count: usize,
    issued: HashSet<RecordId>,
}

impl Ingestor {
    /// Create an ingestor for a session
    #[inline]
    #[must_use]
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self {
            config,
            count: 0,
            issued: HashSet::new(),
        }
    }

    /// Accept one file.
    ///
    /// Resolves the effective MIME type through the allow-list's extension
    /// aliases when the declared type is missing, then checks type, size and
    /// count.
    pub fn accept(&mut self, mut file: SourceFile, timestamp_ms: u64) -> UploadRecord {
        let errors = self.validate(&mut file);

        let id = self.mint_id(timestamp_ms, &file.name);
        self.count += 1;

        let mut record = UploadRecord::new(id, Arc::new(file));
        if !errors.is_empty() {
            tracing::debug!(id = %record.id, ?errors, "file failed validation");
            record.errors = errors.iter().map(ToString::to_string).collect();
        }
        record
    }

    /// Records created so far
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether further files would be rejected for count
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count >= self.config.max_files
    }

    /// Forget the count; issued ids stay reserved
    pub fn reset(&mut self) {
        self.count = 0;
    }

    fn validate(&self, file: &mut SourceFile) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        match self.config.accept.resolve(&file.mime, file.extension().as_deref()) {
            Some(mime) => file.mime = mime,
            None => errors.push(ValidationError::UnsupportedType),
        }

        if file.size() > self.config.max_file_size {
            errors.push(ValidationError::TooLarge {
                size: file.size(),
                max: self.config.max_file_size,
            });
        }

        if self.is_full() {
            errors.push(ValidationError::TooManyFiles {
                max: self.config.max_files,
            });
        }

        errors
    }

    fn mint_id(&mut self, timestamp_ms: u64, name: &str) -> RecordId {
        let base = RecordId::derive(timestamp_ms, name);
        let mut id = base.clone();
        let mut n = 1;
        while self.issued.contains(&id) {
            id = RecordId(format!("{base}-{n}"));
            n += 1;
        }
        self.issued.insert(id.clone());
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordState;

    fn ingestor(config: PipelineConfig) -> Ingestor {
        Ingestor::new(Arc::new(config))
    }

    fn png(name: &str, size: usize) -> SourceFile {
        SourceFile::new(name, "image/png", vec![0u8; size])
    }

    #[test]
    fn accepted_file_has_no_errors() {
        let mut ing = ingestor(PipelineConfig::default());
        let record = ing.accept(png("a.png", 10), 1);
        assert_eq!(record.state, RecordState::Dropped);
        assert!(record.errors.is_empty());
        assert_eq!(record.source.mime, "image/png");
    }

    #[test]
    fn ids_are_unique_for_identical_names_and_times() {
        let mut ing = ingestor(PipelineConfig::default());
        let ids: HashSet<_> = (0..5).map(|_| ing.accept(png("a.png", 1), 42).id).collect();
        assert_eq!(ids.len(), 5);
        assert!(ids.contains(&RecordId::from("42-a.png")));
        assert!(ids.contains(&RecordId::from("42-a.png-1")));
    }

    #[test]
    fn unsupported_and_oversized_collect_both_errors() {
        let mut ing = ingestor(PipelineConfig::default().with_max_file_size(5));
        let record = ing.accept(SourceFile::new("doc.pdf", "application/pdf", vec![0u8; 6]), 1);
        assert_eq!(
            record.errors,
            vec!["File type not accepted.".to_string(), "File size exceeds limit.".to_string()]
        );
    }

    #[test]
    fn extension_alias_fills_missing_type() {
        let mut ing = ingestor(PipelineConfig::default());
        let record = ing.accept(SourceFile::new("IMG_0001.HEIC", "", vec![1u8; 3]), 1);
        assert!(record.errors.is_empty());
        assert_eq!(record.source.mime, "image/heic");
    }

    #[test]
    fn file_past_max_count_is_flagged_not_dropped() {
        let mut ing = ingestor(PipelineConfig::default());
        let records: Vec<_> = (0..21).map(|i| ing.accept(png(&format!("{i}.png"), 1), 7)).collect();

        assert_eq!(records.len(), 21);
        assert!(records[..20].iter().all(|r| r.errors.is_empty()));
        assert_eq!(records[20].errors, vec!["Max allowed number of files reached.".to_string()]);
        assert!(ing.is_full());
    }
}
