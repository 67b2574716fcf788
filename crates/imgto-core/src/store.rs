//! Record store
//!
//! The record collection is the one shared mutable resource of a session.
//! It is kept as a persistent vector behind a single mutex: every mutation
//! clones the matching record, applies the change, replaces it by id and
//! publishes the new collection as a snapshot. Concurrent updates to
//! different records therefore never overwrite each other.

use crate::error::StoreError;
use crate::state_machine::validate_transition;
use crate::types::{RecordId, RecordState, UploadRecord, VariantSet};
use parking_lot::Mutex;
use tokio::sync::watch;

/// Immutable view of the collection at one point in time
pub type Snapshot = im::Vector<UploadRecord>;

/// Append-only record collection with per-record replace updates
#[derive(Debug)]
pub struct RecordStore {
    records: Mutex<Snapshot>,
    tx: watch::Sender<Snapshot>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::new());
        Self {
            records: Mutex::new(Snapshot::new()),
            tx,
        }
    }

    /// Current snapshot
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.records.lock().clone()
    }

    /// Receive a snapshot after every mutation
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Single record by id
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<UploadRecord> {
        self.records.lock().iter().find(|r| &r.id == id).cloned()
    }

    /// Number of records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a new record
    pub fn push(&self, record: UploadRecord) -> RecordId {
        let id = record.id.clone();
        let mut guard = self.records.lock();
        guard.push_back(record);
        self.tx.send_replace(guard.clone());
        id
    }

    /// Drop every record (session reset)
    pub fn clear(&self) {
        let mut guard = self.records.lock();
        guard.clear();
        self.tx.send_replace(guard.clone());
    }

    /// Replace one record with a modified copy.
    ///
    /// `f` runs on a clone; the collection only changes when it returns `Ok`.
    pub(crate) fn update<T>(
        &self,
        id: &RecordId,
        f: impl FnOnce(&mut UploadRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.records.lock();
        let index = guard
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let mut next = guard[index].clone();
        let out = f(&mut next)?;
        guard.set(index, next);
        self.tx.send_replace(guard.clone());
        Ok(out)
    }

    /// Move one record to `to`
    pub fn transition(&self, id: &RecordId, to: RecordState) -> Result<(), StoreError> {
        self.update(id, |record| {
            validate_transition(record.state, to)?;
            record.state = to;
            Ok(())
        })
    }

    /// Move every record in `from` accepted by `filter` to `to` in one
    /// mutation, returning the moved records in collection order
    pub(crate) fn claim(
        &self,
        from: RecordState,
        to: RecordState,
        mut filter: impl FnMut(&UploadRecord) -> bool,
    ) -> Result<Vec<UploadRecord>, StoreError> {
        validate_transition(from, to)?;

        let mut guard = self.records.lock();
        let mut claimed = Vec::new();
        let mut next = guard.clone();
        for (index, record) in guard.iter().enumerate() {
            if record.state == from && filter(record) {
                let mut moved = record.clone();
                moved.state = to;
                next.set(index, moved.clone());
                claimed.push(moved);
            }
        }
        if !claimed.is_empty() {
            *guard = next;
            self.tx.send_replace(guard.clone());
        }
        Ok(claimed)
    }

    /// Move a record to `error`, appending a reason when given
    pub fn fail(&self, id: &RecordId, reason: Option<&str>) -> Result<(), StoreError> {
        self.update(id, |record| {
            validate_transition(record.state, RecordState::Error)?;
            record.state = RecordState::Error;
            record.variants.clear();
            if let Some(reason) = reason {
                record.errors.push(reason.to_string());
            }
            Ok(())
        })
    }

    /// Attach variants and move an optimizing record to `finished`
    pub fn finish(&self, id: &RecordId, variants: VariantSet) -> Result<(), StoreError> {
        self.update(id, |record| {
            validate_transition(record.state, RecordState::Finished)?;
            if variants.is_empty() {
                return Err(StoreError::Transition(crate::error::TransitionError {
                    from: record.state,
                    to: RecordState::Finished,
                }));
            }
            record.state = RecordState::Finished;
            record.variants = variants;
            Ok(())
        })
    }
}
