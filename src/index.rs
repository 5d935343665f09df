//! The per-author index (spec §4.6): a pure indexing function attached to
//! the root log's append stream, grounded on the reference implementation's
//! `OpenUserFeeds` index registration (`multilogs/userfeeds.go`), which opens
//! the author's sub-log and appends the new root-log offset for every
//! observed `(seq, message)`.

use crate::envelope::StoredEnvelope;
use crate::error::StorageError;
use crate::log::{RootLog, UserFeeds};
use crate::message::Message;

/// Indexes one newly appended `(root_seq, message)` pair. Idempotent only in
/// the sense that replaying the same root log from offset zero reconstructs
/// the same index (spec §4.6) — calling this twice for the same `root_seq`
/// double-appends, same as the reference implementation's registered index
/// function would if invoked twice for one append.
pub async fn apply(
    user_feeds: &dyn UserFeeds,
    root_seq: u64,
    message: &StoredEnvelope,
) -> Result<(), StorageError> {
    let addr = message.author().storage_addr();
    user_feeds.append(&addr, root_seq).await?;
    Ok(())
}

/// Rebuilds the per-author index from scratch by replaying `root_log` from
/// offset zero (spec §4.6 "recoverable": "re-running over the root log from
/// offset zero reconstructs the same index").
pub async fn rebuild(root_log: &dyn RootLog, user_feeds: &dyn UserFeeds) -> Result<(), StorageError> {
    let mut seq = 0u64;
    loop {
        match root_log.get(seq).await {
            Ok(message) => {
                apply(user_feeds, seq, &message).await?;
                seq += 1;
            }
            Err(StorageError::NotFound(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
