//! Locally authored append path (spec §4.5), grounded on the reference
//! implementation's `Publish`/`streamlog.go` `AppendDrain`: look up the
//! current head, encode + sign the new event, append, update the index.
//! Serialized by a per-author lock held across the whole
//! read-head -> encode -> append section so two concurrent publishes on the
//! same feed can't race onto the same sequence number (spec §5, P7).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::codec;
use crate::error::CoreError;
use crate::index;
use crate::keys::AuthorKeyPair;
use crate::log::{RootLog, UserFeeds};
use crate::message::{Content, Message};
use crate::refs::MessageRef;

/// Publishes locally authored content onto `root_log`/`user_feeds` for one
/// or more author key pairs, serializing concurrent publishes per author
/// (spec §4.5, §5).
pub struct Publisher {
    root_log: Arc<dyn RootLog>,
    user_feeds: Arc<dyn UserFeeds>,
    hmac_key: Option<[u8; 32]>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Publisher {
    pub fn new(root_log: Arc<dyn RootLog>, user_feeds: Arc<dyn UserFeeds>, hmac_key: Option<[u8; 32]>) -> Self {
        Publisher { root_log, user_feeds, hmac_key, locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, addr: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(addr.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Steps 1-6 of spec §4.5: observe tail, form `previous`, encode+sign,
    /// append, index, return the new message's `MessageRef`.
    pub async fn publish(
        &self,
        author: &AuthorKeyPair,
        content: Content,
        claimed_timestamp: u64,
    ) -> Result<MessageRef, CoreError> {
        let author_ref = author.feed_ref();
        let addr = author_ref.storage_addr();
        let author_lock = self.lock_for(&addr).await;
        let _guard = author_lock.lock().await;

        let current_seq = self.user_feeds.len(&addr).await;
        let previous = if current_seq > 0 {
            let head_root_seq = self.user_feeds.get(&addr, current_seq - 1).await?;
            let head = self.root_log.get(head_root_seq).await?;
            Some(head.key())
        } else {
            None
        };

        let (envelope, msg_ref) =
            codec::encode(author, current_seq + 1, previous, &content, claimed_timestamp, self.hmac_key.as_ref())?;

        let root_seq = self.root_log.append(envelope.clone()).await?;
        index::apply(self.user_feeds.as_ref(), root_seq, &envelope).await?;

        ::log::debug!("published {} at sequence {}", addr, current_seq + 1);
        Ok(msg_ref)
    }
}
