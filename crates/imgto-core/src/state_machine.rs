use crate::error::TransitionError;
use crate::types::RecordState;

/// Validates a record state transition.
///
/// `error` is reachable from every non-terminal state; everything else moves
/// strictly forward one step at a time.
pub fn validate_transition(from: RecordState, to: RecordState) -> Result<(), TransitionError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// States reachable from `from` in one step
pub fn allowed_transitions(from: RecordState) -> &'static [RecordState] {
    use RecordState::*;
    match from {
        Dropped => &[Reading, Error],
        Reading => &[Read, Error],
        Read => &[Uploading, Error],
        Uploading => &[Optimizing, Error],
        Optimizing => &[Finished, Error],
        Finished => &[],
        Error => &[],
    }
}

fn allowed(from: RecordState, to: RecordState) -> bool {
    allowed_transitions(from).contains(&to)
}
