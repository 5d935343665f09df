//! The append-only log and multi-log index substrates the core consumes
//! (spec §1 "out of scope": "the append-only log and multi-log index
//! substrates"; spec §3.4 "logs and indexes"). The core depends only on
//! these traits; any concrete storage engine (on-disk, sqlite, etc.) is
//! surrounding functionality. An in-memory implementation of each is shipped
//! for tests and small deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::envelope::StoredEnvelope;
use crate::error::StorageError;

/// An append-only sequence of stored envelopes indexed by a monotonically
/// increasing 0-based offset (spec §3.4 `RootLog`).
#[async_trait]
pub trait RootLog: Send + Sync {
    async fn append(&self, envelope: StoredEnvelope) -> Result<u64, StorageError>;
    async fn get(&self, seq: u64) -> Result<StoredEnvelope, StorageError>;
    /// The offset of the most recently appended entry, or `None` if empty.
    async fn seq(&self) -> Option<u64>;
}

/// A `MultiLog` keyed by `FeedRef::storage_addr` (spec §3.4 `UserFeeds`).
/// Each sub-log is an append-only sequence of `RootLog` offsets, one per
/// message authored by that feed, in author-sequence order.
#[async_trait]
pub trait UserFeeds: Send + Sync {
    /// Appends `root_seq` to the sub-log for `author_addr`, returning the
    /// sub-log's own 0-based position for the new entry.
    async fn append(&self, author_addr: &str, root_seq: u64) -> Result<u64, StorageError>;
    async fn get(&self, author_addr: &str, i: u64) -> Result<u64, StorageError>;
    /// Number of entries in the sub-log for `author_addr` (0 if unopened).
    async fn len(&self, author_addr: &str) -> u64;
}

/// In-memory `RootLog`, suitable for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemRootLog {
    entries: Mutex<Vec<StoredEnvelope>>,
}

impl MemRootLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RootLog for MemRootLog {
    async fn append(&self, envelope: StoredEnvelope) -> Result<u64, StorageError> {
        let mut entries = self.entries.lock().await;
        entries.push(envelope);
        Ok(entries.len() as u64 - 1)
    }

    async fn get(&self, seq: u64) -> Result<StoredEnvelope, StorageError> {
        let entries = self.entries.lock().await;
        entries.get(seq as usize).cloned().ok_or(StorageError::NotFound(seq))
    }

    async fn seq(&self) -> Option<u64> {
        let entries = self.entries.lock().await;
        entries.len().checked_sub(1).map(|n| n as u64)
    }
}

/// In-memory `UserFeeds`, suitable for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemUserFeeds {
    subs: Mutex<HashMap<String, Vec<u64>>>,
}

impl MemUserFeeds {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserFeeds for MemUserFeeds {
    async fn append(&self, author_addr: &str, root_seq: u64) -> Result<u64, StorageError> {
        let mut subs = self.subs.lock().await;
        let sub = subs.entry(author_addr.to_string()).or_default();
        sub.push(root_seq);
        Ok(sub.len() as u64 - 1)
    }

    async fn get(&self, author_addr: &str, i: u64) -> Result<u64, StorageError> {
        let subs = self.subs.lock().await;
        subs.get(author_addr)
            .and_then(|sub| sub.get(i as usize))
            .copied()
            .ok_or(StorageError::NotFound(i))
    }

    async fn len(&self, author_addr: &str) -> u64 {
        let subs = self.subs.lock().await;
        subs.get(author_addr).map(|sub| sub.len() as u64).unwrap_or(0)
    }
}
