//! Verify-and-append sink (spec §4.4), grounded on the reference
//! implementation's `streamDrain`/`NewVerifySink` (`message/drains.go`): a
//! per-feed stateful drain that decodes, verifies, validates and appends raw
//! values one at a time, halting for good on the first chain or signature
//! failure.

use std::sync::Arc;

use crate::codec;
use crate::envelope::StoredEnvelope;
use crate::error::{CoreError, ValidationError};
use crate::index;
use crate::log::{RootLog, UserFeeds};
use crate::message::Message;
use crate::refs::FeedRef;
use crate::validator::validate_next;

/// Stops the sink for good: the codec rejected a signature, or the chain
/// invariant was violated (spec §4.4, §7 "a fork... is a terminal state").
fn is_terminal(err: &CoreError) -> bool {
    matches!(
        err,
        CoreError::Codec(crate::error::CodecError::SignatureInvalid)
            | CoreError::Validation(_)
    )
}

/// A per-feed stateful consumer (spec §4.4). Construction takes the feed's
/// currently known head from the per-author index.
pub struct VerifySink {
    feed: FeedRef,
    hmac_key: Option<[u8; 32]>,
    latest: Option<StoredEnvelope>,
    root_log: Arc<dyn RootLog>,
    user_feeds: Arc<dyn UserFeeds>,
    last_error: Option<CoreError>,
    terminal: bool,
}

impl VerifySink {
    pub fn new(
        feed: FeedRef,
        latest: Option<StoredEnvelope>,
        root_log: Arc<dyn RootLog>,
        user_feeds: Arc<dyn UserFeeds>,
        hmac_key: Option<[u8; 32]>,
    ) -> Self {
        VerifySink { feed, hmac_key, latest, root_log, user_feeds, last_error: None, terminal: false }
    }

    pub fn latest_sequence(&self) -> u64 {
        self.latest.as_ref().map(|m| m.sequence()).unwrap_or(0)
    }

    /// The error that halted the sink, if any (spec §9 "sink's observable
    /// `last_error`/terminal-state flag").
    pub fn last_error(&self) -> Option<&CoreError> {
        self.last_error.as_ref()
    }

    /// `true` once a chain fork or signature failure has permanently
    /// stopped this sink for its feed.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Feeds one raw value through decode → verify → validate → append →
    /// index (spec §4.4 steps 1-6). Does nothing and returns the stored
    /// `last_error` again if the sink is already terminal.
    pub async fn pour(&mut self, raw: &[u8]) -> Result<(), CoreError> {
        if self.terminal {
            return Err(self
                .last_error
                .clone()
                .unwrap_or_else(|| CoreError::Validation(ValidationError::WrongAuthor)));
        }

        let result = self.pour_inner(raw).await;
        if let Err(ref e) = result {
            if is_terminal(e) {
                self.terminal = true;
                ::log::warn!("feed {} halted permanently: {e}", self.feed.to_ref_string());
            } else {
                ::log::debug!("feed {} attempt failed, will retry: {e}", self.feed.to_ref_string());
            }
            self.last_error = Some(e.clone());
        }
        result
    }

    async fn pour_inner(&mut self, raw: &[u8]) -> Result<(), CoreError> {
        let parsed = codec::verify(self.feed.algo, raw, self.hmac_key.as_ref())?;

        validate_next(self.latest.as_ref().map(|m| m as &dyn Message), &parsed)?;

        let root_seq = self.root_log.append(parsed.clone()).await?;
        index::apply(self.user_feeds.as_ref(), root_seq, &parsed).await?;

        self.latest = Some(parsed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::legacy;
    use crate::keys::AuthorKeyPair;
    use crate::log::{MemRootLog, MemUserFeeds};
    use crate::message::Content;
    use crate::refs::{FeedAlgo, MessageAlgo, MessageRef};

    fn sink() -> (VerifySink, AuthorKeyPair) {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let root_log: Arc<dyn RootLog> = Arc::new(MemRootLog::new());
        let user_feeds: Arc<dyn UserFeeds> = Arc::new(MemUserFeeds::new());
        (VerifySink::new(kp.feed_ref(), None, root_log, user_feeds, None), kp)
    }

    #[tokio::test]
    async fn accepts_a_valid_chain() {
        let (mut sink, kp) = sink();
        let mut previous = None;
        for seq in 1..=3u64 {
            let content = Content::Text(format!("m{seq}"));
            let (body, msg_ref) = legacy::encode(&kp, seq, previous, &content, 0, None).unwrap();
            previous = Some(msg_ref);
            sink.pour(body.raw()).await.unwrap();
        }
        assert_eq!(sink.latest_sequence(), 3);
        assert!(!sink.is_terminal());
    }

    #[tokio::test]
    async fn stops_permanently_on_previous_mismatch() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (mut sink, kp) = sink();
        let (first, _) = legacy::encode(&kp, 1, None, &Content::Text("a".into()), 0, None).unwrap();
        sink.pour(first.raw()).await.unwrap();

        let wrong_prev = MessageRef::new([0xffu8; 32], MessageAlgo::Sha256);
        let (bad, _) = legacy::encode(&kp, 2, Some(wrong_prev), &Content::Text("b".into()), 0, None).unwrap();
        let err = sink.pour(bad.raw()).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::PreviousMismatch)));
        assert!(sink.is_terminal());

        let (next, _) = legacy::encode(&kp, 2, Some(first.key()), &Content::Text("c".into()), 0, None).unwrap();
        assert!(sink.pour(next.raw()).await.is_err());
        assert_eq!(sink.latest_sequence(), 1);
    }
}
