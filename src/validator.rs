//! Stateless chain-consistency validator (spec §4.3).
//!
//! Deliberately ignorant of signatures — that's the codec's job (spec §4.1)
//! — so this and the codecs are each cheaply unit-testable in isolation.

use crate::error::ValidationError;
use crate::message::Message;

/// Checks that `next` may legally follow `current` on the same feed.
///
/// `current == None` means `next` is the first message ever seen for this
/// feed (spec §4.3): it must have `sequence == 1`. Otherwise `next` must
/// share `current`'s author, chain from `current`'s key via `previous`, and
/// advance the sequence by exactly one.
pub fn validate_next(
    current: Option<&dyn Message>,
    next: &dyn Message,
) -> Result<(), ValidationError> {
    match current {
        None => {
            if next.sequence() != 1 {
                return Err(ValidationError::FirstMessageSeq);
            }
            Ok(())
        }
        Some(current) => {
            if next.author() != current.author() {
                return Err(ValidationError::WrongAuthor);
            }
            // Compare hashes only (spec §4.3: "next.previous.hash ==
            // current.key.hash"), not full `MessageRef` equality — a
            // `previous` reconstructed off the wire (e.g. via a
            // `StorageRef`) may carry a different display suffix than the
            // key it was computed from while still chaining correctly.
            match next.previous() {
                Some(prev) if prev.hash == current.key().hash => {}
                _ => return Err(ValidationError::PreviousMismatch),
            }
            if next.sequence() != current.sequence() + 1 {
                return Err(ValidationError::SequenceGap);
            }
            Ok(())
        }
    }
}
