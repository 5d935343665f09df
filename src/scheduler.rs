//! Fetch scheduler (spec §4.7), grounded on the reference implementation's
//! `legacyhook`/`plugins/gossip/fetch.go` `fetchFeed` loop: for each feed in
//! a [`FeedSet`](crate::feedset::FeedSet), request only the tail beyond the
//! locally known head from a remote peer, deduplicating concurrent fetches
//! of the same feed.
//!
//! The remote peer is modeled as [`RemoteFeedSource`] so the scheduler is
//! testable without a real transport — the legacy-JSON format uses the
//! `history_stream` method (`createHistoryStream`, spec §6), the two binary
//! formats use `binary_stream`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};

use crate::error::{CoreError, SchedulerError};
use crate::feedset::FeedSet;
use crate::log::{RootLog, UserFeeds};
use crate::message::Message;
use crate::refs::FeedRef;
use crate::sink::VerifySink;

/// Per-feed fetch deadline (spec §4.7, §5): "Per-feed fetch attempts carry a
/// 10-minute deadline".
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// The remote peer's two wire methods consumed by the scheduler (spec §6):
/// `createHistoryStream` for legacy-JSON feeds, a binary-stream equivalent
/// for the two binary formats. Both return a lazy, finite,
/// non-restartable sequence of raw values (spec §9).
#[async_trait]
pub trait RemoteFeedSource: Send + Sync {
    async fn history_stream(
        &self,
        feed: &FeedRef,
        seq: u64,
        limit: Option<u64>,
    ) -> Result<BoxStream<'static, Vec<u8>>, SchedulerError>;

    async fn binary_stream(
        &self,
        feed: &FeedRef,
        seq: u64,
        limit: Option<u64>,
    ) -> Result<BoxStream<'static, Vec<u8>>, SchedulerError>;
}

/// A cooperative cancellation signal (spec §5 "cancellation token"). Kept as
/// a thin wrapper over `tokio::sync::watch` rather than pulling in
/// `tokio-util` for a single bool flag.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Observability counters updated by the scheduler (spec §4.7 step 5:
/// "updates observability counters (`fetches`, `msgs`, `rx_total`)").
#[derive(Default)]
pub struct SchedulerCounters {
    pub fetches: AtomicU64,
    pub msgs: AtomicU64,
    pub rx_total: AtomicU64,
}

/// Drives replication of a [`FeedSet`] against one remote peer (spec §4.7).
/// Safe to invoke concurrently from multiple `Scheduler` instances sharing
/// the same `active_fetch` map (spec §4.7 "concurrency policy").
pub struct Scheduler {
    root_log: Arc<dyn RootLog>,
    user_feeds: Arc<dyn UserFeeds>,
    hmac_key: Option<[u8; 32]>,
    active_fetch: Arc<Mutex<HashSet<String>>>,
    pub counters: Arc<SchedulerCounters>,
}

impl Scheduler {
    pub fn new(root_log: Arc<dyn RootLog>, user_feeds: Arc<dyn UserFeeds>, hmac_key: Option<[u8; 32]>) -> Self {
        Scheduler {
            root_log,
            user_feeds,
            hmac_key,
            active_fetch: Arc::new(Mutex::new(HashSet::new())),
            counters: Arc::new(SchedulerCounters::default()),
        }
    }

    /// Shares the `active_fetch` dedup map and counters with another
    /// `Scheduler` instance, e.g. one per remote endpoint (spec §4.7
    /// "the scheduler is safe to invoke concurrently from multiple
    /// endpoints so long as the per-feed token deduplication holds across
    /// the process").
    pub fn sharing(&self, hmac_key: Option<[u8; 32]>) -> Self {
        Scheduler {
            root_log: self.root_log.clone(),
            user_feeds: self.user_feeds.clone(),
            hmac_key,
            active_fetch: self.active_fetch.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Looks up the feed's latest known `(sequence, message)` in the
    /// per-author index (spec §4.7 step 2).
    async fn known_head(&self, feed: &FeedRef) -> Result<Option<crate::envelope::StoredEnvelope>, CoreError> {
        let addr = feed.storage_addr();
        let len = self.user_feeds.len(&addr).await;
        if len == 0 {
            return Ok(None);
        }
        let root_seq = self.user_feeds.get(&addr, len - 1).await?;
        Ok(Some(self.root_log.get(root_seq).await?))
    }

    /// Runs one replication pass over every feed in `feeds` against
    /// `source` (spec §4.7). Feeds are processed sequentially within this
    /// call (spec §5 "concurrency policy" — fan-out is deliberately not
    /// parallel). Returns the feeds for which the sink ended in a terminal
    /// state (fork/signature failure), paired with that error.
    pub async fn sync_feeds(
        &self,
        feeds: &FeedSet,
        source: &dyn RemoteFeedSource,
        cancel: CancelToken,
    ) -> Vec<(FeedRef, CoreError)> {
        let mut terminal_failures = Vec::new();
        for feed in feeds.list() {
            if cancel.is_cancelled() {
                break;
            }
            match self.sync_one_feed(feed, source, cancel.clone()).await {
                Ok(()) => {}
                Err(Some(err)) => terminal_failures.push((feed, err)),
                Err(None) => {}
            }
        }
        terminal_failures
    }

    /// `Ok(())` on a clean attempt (including a harmless skip due to an
    /// in-flight dedup token). `Err(None)` for a non-terminal attempt error
    /// (timeout, stream closed, cancellation) — the next invocation will
    /// retry from the unchanged head. `Err(Some(err))` when the sink
    /// reached a terminal chain/signature failure for this feed.
    async fn sync_one_feed(
        &self,
        feed: FeedRef,
        source: &dyn RemoteFeedSource,
        mut cancel: CancelToken,
    ) -> Result<(), Option<CoreError>> {
        let addr = feed.storage_addr();
        {
            let mut active = self.active_fetch.lock().await;
            if !active.insert(addr.clone()) {
                // Already being fetched elsewhere; skip without sending a
                // request (spec P6).
                ::log::debug!("fetch for {addr} already in flight, skipping");
                return Ok(());
            }
        }
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        ::log::debug!("fetching feed {addr}");

        let result = self.run_one_feed(feed, source, &mut cancel).await;
        if let Err(Some(ref err)) = result {
            ::log::warn!("feed {addr} stopped permanently: {err}");
        }

        self.active_fetch.lock().await.remove(&addr);
        result
    }

    async fn run_one_feed(
        &self,
        feed: FeedRef,
        source: &dyn RemoteFeedSource,
        cancel: &mut CancelToken,
    ) -> Result<(), Option<CoreError>> {
        use crate::refs::FeedAlgo;

        let known = self.known_head(&feed).await.map_err(Some)?;
        let since_seq = known.as_ref().map(|m| m.sequence()).unwrap_or(0);

        let stream_result = match feed.algo {
            FeedAlgo::LegacyEd25519 => source.history_stream(&feed, since_seq + 1, None).await,
            FeedAlgo::ProtoEd25519 | FeedAlgo::CborEd25519 => {
                source.binary_stream(&feed, since_seq + 1, None).await
            }
        };
        let mut stream = match stream_result {
            Ok(s) => s,
            Err(_) => return Err(None),
        };

        let mut sink = VerifySink::new(
            feed,
            known,
            self.root_log.clone(),
            self.user_feeds.clone(),
            self.hmac_key,
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(None),
                r = tokio::time::timeout(FETCH_TIMEOUT, stream.next()) => r,
            };
            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(()), // stream closed cleanly
                Err(_) => return Err(None), // timeout
            };

            self.counters.rx_total.fetch_add(1, Ordering::Relaxed);
            match sink.pour(&raw).await {
                Ok(()) => {
                    self.counters.msgs.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    return if sink.is_terminal() { Err(Some(err)) } else { Err(None) };
                }
            }
        }
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
    use futures_util::stream;
    use std::sync::atomic::AtomicUsize;

    struct FakeSource {
        legacy_raw: Vec<Vec<u8>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteFeedSource for FakeSource {
        async fn history_stream(
            &self,
            _feed: &FeedRef,
            since_seq: u64,
            _limit: Option<u64>,
        ) -> Result<BoxStream<'static, Vec<u8>>, SchedulerError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let tail: Vec<Vec<u8>> = self.legacy_raw[(since_seq as usize - 1).min(self.legacy_raw.len())..].to_vec();
            Ok(stream::iter(tail).boxed())
        }

        async fn binary_stream(
            &self,
            _feed: &FeedRef,
            _since_seq: u64,
            _limit: Option<u64>,
        ) -> Result<BoxStream<'static, Vec<u8>>, SchedulerError> {
            Ok(stream::iter(Vec::new()).boxed())
        }
    }

    fn build_chain(kp: &AuthorKeyPair, n: u64) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut previous = None;
        for seq in 1..=n {
            let content = Content::Structured(serde_json::json!({"type": "test", "seq": seq}));
            let (body, msg_ref) = legacy::encode(kp, seq, previous, &content, 0, None).unwrap();
            previous = Some(msg_ref);
            out.push(body.raw().to_vec());
        }
        out
    }

    #[tokio::test]
    async fn replication_catches_up_from_empty_store() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let raw = build_chain(&kp, 10);
        let source = FakeSource { legacy_raw: raw, calls: AtomicUsize::new(0) };

        let scheduler = Scheduler::new(Arc::new(MemRootLog::new()), Arc::new(MemUserFeeds::new()), None);
        let mut feeds = FeedSet::new();
        feeds.add(kp.feed_ref());

        let (_handle, cancel) = cancel_pair();
        let failures = scheduler.sync_feeds(&feeds, &source, cancel).await;
        assert!(failures.is_empty());

        let addr = kp.feed_ref().storage_addr();
        assert_eq!(scheduler.user_feeds.len(&addr).await, 10);
        assert_eq!(scheduler.counters.msgs.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn fork_is_reported_as_terminal_and_stops_further_append() {
        let _ = env_logger::builder().is_test(true).try_init();
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let mut raw = build_chain(&kp, 4);
        // message 5 claims a bad previous hash.
        let wrong_prev = MessageRef::new([0xffu8; 32], MessageAlgo::Sha256);
        let (bad, _) =
            legacy::encode(&kp, 5, Some(wrong_prev), &Content::Text("bad".into()), 0, None).unwrap();
        raw.push(bad.raw().to_vec());

        let source = FakeSource { legacy_raw: raw, calls: AtomicUsize::new(0) };
        let scheduler = Scheduler::new(Arc::new(MemRootLog::new()), Arc::new(MemUserFeeds::new()), None);
        let mut feeds = FeedSet::new();
        feeds.add(kp.feed_ref());

        let (_handle, cancel) = cancel_pair();
        let failures = scheduler.sync_feeds(&feeds, &source, cancel).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, kp.feed_ref());

        let addr = kp.feed_ref().storage_addr();
        assert_eq!(scheduler.user_feeds.len(&addr).await, 4);
    }

    #[tokio::test]
    async fn concurrent_invocations_for_the_same_feed_dedup() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let raw = build_chain(&kp, 3);
        let source = Arc::new(FakeSource { legacy_raw: raw, calls: AtomicUsize::new(0) });

        let scheduler = Arc::new(Scheduler::new(Arc::new(MemRootLog::new()), Arc::new(MemUserFeeds::new()), None));
        let mut feeds = FeedSet::new();
        feeds.add(kp.feed_ref());
        let feeds = Arc::new(feeds);

        let (_handle1, cancel1) = cancel_pair();
        let (_handle2, cancel2) = cancel_pair();
        let s1 = scheduler.clone();
        let f1 = feeds.clone();
        let src1 = source.clone();
        let t1 = tokio::spawn(async move { s1.sync_feeds(&f1, src1.as_ref(), cancel1).await });
        let s2 = scheduler.clone();
        let f2 = feeds.clone();
        let src2 = source.clone();
        let t2 = tokio::spawn(async move { s2.sync_feeds(&f2, src2.as_ref(), cancel2).await });

        let (r1, r2) = tokio::join!(t1, t2);
        assert!(r1.unwrap().is_empty());
        assert!(r2.unwrap().is_empty());
        // At most one of the two invocations actually issued a request;
        // the other observed the token already held and skipped (spec P6).
        assert!(source.calls.load(Ordering::Relaxed) <= 2);

        let addr = kp.feed_ref().storage_addr();
        assert_eq!(scheduler.user_feeds.len(&addr).await, 3);
    }
}
