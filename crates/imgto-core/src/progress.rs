//! Aggregate progress
//!
//! A pure function of a record snapshot. Nothing here holds state; callers
//! recompute on every published snapshot.

use crate::types::{Format, RecordState, UploadRecord};
use serde::Serialize;
use std::fmt;

/// Share of the bar reserved once any work has started
pub const BASELINE_PERCENT: f64 = 12.5;

/// Session-wide state shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalState {
    /// Idle or only local work in progress
    Ready,
    /// At least one record uploading or optimizing
    Optimizing,
    /// Every record finished or failed
    Finished,
}

impl fmt::Display for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GlobalState::Ready => "Ready",
            GlobalState::Optimizing => "Optimizing",
            GlobalState::Finished => "Done",
        })
    }
}

/// Derived counts and display values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateProgress {
    /// Records in `uploading`
    pub uploading: usize,
    /// Records in `optimizing`
    pub optimizing: usize,
    /// Records in `error`
    pub error: usize,
    /// Records in `finished`
    pub finished: usize,
    /// All records
    pub total: usize,
    /// Computed global state
    pub global_state: GlobalState,
    /// Display percentage in `0.0..=100.0`
    pub percent: f64,
    /// Sum of original sizes
    pub original_bytes: u64,
    /// Sum of measured optimized sizes
    pub optimized_bytes: u64,
}

impl AggregateProgress {
    /// Compute from any sequence of records
    #[must_use]
    pub fn of<'a>(records: impl IntoIterator<Item = &'a UploadRecord>) -> Self {
        let mut p = Self {
            uploading: 0,
            optimizing: 0,
            error: 0,
            finished: 0,
            total: 0,
            global_state: GlobalState::Ready,
            percent: 0.0,
            original_bytes: 0,
            optimized_bytes: 0,
        };
        let mut started = false;

        for record in records {
            p.total += 1;
            p.original_bytes += record.original_size;
            started |= record.state != RecordState::Dropped;
            match record.state {
                RecordState::Uploading => p.uploading += 1,
                RecordState::Optimizing => p.optimizing += 1,
                RecordState::Error => p.error += 1,
                RecordState::Finished => {
                    p.finished += 1;
                    p.optimized_bytes += record
                        .variants
                        .get(Format::Optimized)
                        .and_then(|v| v.size)
                        .unwrap_or(0);
                }
                _ => {}
            }
        }

        let done = p.finished + p.error;
        p.global_state = if p.total > 0 && done == p.total {
            GlobalState::Finished
        } else if p.uploading + p.optimizing > 0 {
            GlobalState::Optimizing
        } else {
            GlobalState::Ready
        };

        p.percent = if p.global_state == GlobalState::Finished {
            100.0
        } else if p.total == 0 || !started {
            0.0
        } else {
            BASELINE_PERCENT + (done as f64 / p.total as f64) * (100.0 - BASELINE_PERCENT)
        };
        p
    }

    /// Records that reached a terminal state
    #[inline]
    #[must_use]
    pub fn done(&self) -> usize {
        self.finished + self.error
    }

    /// Percentage saved by optimization once every record is done and at
    /// least one was measured
    #[must_use]
    pub fn savings_percent(&self) -> Option<f64> {
        if self.global_state != GlobalState::Finished
            || self.original_bytes == 0
            || self.optimized_bytes == 0
        {
            return None;
        }
        Some(100.0 - (self.optimized_bytes as f64 / self.original_bytes as f64) * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordId, SourceFile, Variant, VariantSet};
    use bytes::Bytes;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn record(state: RecordState) -> UploadRecord {
        let source = Arc::new(SourceFile::new("a.png", "image/png", vec![0u8; 100]));
        let mut r = UploadRecord::new(RecordId::from("a"), source);
        r.state = state;
        if state == RecordState::Finished {
            r.variants = VariantSet::new().with(
                Format::Optimized,
                Variant::measured("u", Bytes::from(vec![0u8; 40])),
            );
        }
        r
    }

    fn of(states: &[RecordState]) -> AggregateProgress {
        let records: Vec<_> = states.iter().copied().map(record).collect();
        AggregateProgress::of(&records)
    }

    #[test]
    fn empty_session_is_ready_at_zero() {
        let p = of(&[]);
        assert_eq!(p.global_state, GlobalState::Ready);
        assert_eq!(p.percent, 0.0);
    }

    #[test]
    fn nothing_started_is_zero() {
        let p = of(&[RecordState::Dropped, RecordState::Dropped]);
        assert_eq!(p.percent, 0.0);
        assert_eq!(p.global_state, GlobalState::Ready);
    }

    #[test]
    fn baseline_once_started() {
        let p = of(&[RecordState::Reading, RecordState::Dropped]);
        assert_eq!(p.percent, BASELINE_PERCENT);
    }

    #[test]
    fn optimizing_when_any_in_flight() {
        let p = of(&[RecordState::Uploading, RecordState::Finished]);
        assert_eq!(p.global_state, GlobalState::Optimizing);
        assert_eq!(p.percent, 12.5 + 0.5 * 87.5);
    }

    #[test]
    fn errors_count_towards_completion() {
        let p = of(&[RecordState::Error, RecordState::Finished]);
        assert_eq!(p.global_state, GlobalState::Finished);
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.done(), 2);
    }

    #[test]
    fn savings_from_measured_sizes() {
        let p = of(&[RecordState::Finished, RecordState::Finished]);
        assert_eq!(p.original_bytes, 200);
        assert_eq!(p.optimized_bytes, 80);
        assert_eq!(p.savings_percent(), Some(60.0));
        assert_eq!(of(&[RecordState::Read]).savings_percent(), None);
    }

    fn forward(state: RecordState, fail: bool) -> RecordState {
        use RecordState::*;
        if fail && !state.is_terminal() {
            return Error;
        }
        match state {
            Dropped => Reading,
            Reading => Read,
            Read => Uploading,
            Uploading => Optimizing,
            Optimizing => Finished,
            other => other,
        }
    }

    proptest! {
        #[test]
        fn prop_percent_never_regresses(
            size in 1usize..12,
            steps in prop::collection::vec((0usize..12, any::<bool>()), 0..80)
        ) {
            let mut states = vec![RecordState::Dropped; size];
            let mut last = of(&states).percent;
            for (idx, fail) in steps {
                let i = idx % size;
                states[i] = forward(states[i], fail);
                let p = of(&states);
                prop_assert!(p.percent >= last, "{} < {}", p.percent, last);
                prop_assert_eq!(p.percent == 100.0, p.global_state == GlobalState::Finished);
                prop_assert_eq!(
                    p.global_state == GlobalState::Finished,
                    p.finished + p.error == p.total && p.total > 0
                );
                last = p.percent;
            }
        }
    }
}
