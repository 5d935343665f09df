//! Multi-format feed ingestion, verification and storage engine for an
//! SSB-style gossip node.
//!
//! Accepts incoming messages from remote peers over a streaming channel,
//! verifies cryptographic signatures under one of three feed formats
//! (legacy-JSON, protobuf-binary, CBOR-binary), validates the append-only
//! log's author/sequence/previous-hash invariants, persists each validated
//! message into a [`log::RootLog`] and updates a per-author [`log::UserFeeds`]
//! index, and publishes locally authored messages under the same rules.
//!
//! Out of scope (consumed as abstractions, not implemented here): the
//! secure-transport/RPC layer, the social-graph computation that decides
//! which feeds to replicate, the blob store, private-message encryption,
//! the peer-invite protocol, and any concrete on-disk log implementation —
//! the crate ships in-memory [`log::MemRootLog`]/[`log::MemUserFeeds`] for
//! tests and embedding applications that don't need durability in-process.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod feedset;
pub mod hmac_auth;
pub mod index;
pub mod keys;
pub mod log;
pub mod message;
pub mod pb;
pub mod publisher;
pub mod refs;
pub mod scheduler;
pub mod sink;
pub mod validator;

pub use envelope::StoredEnvelope;
pub use error::CoreError;
pub use feedset::FeedSet;
pub use keys::{AuthorKeyPair, KeyError};
pub use log::{MemRootLog, MemUserFeeds, RootLog, UserFeeds};
pub use message::{Content, Message, ValueView};
pub use publisher::Publisher;
pub use refs::{BlobRef, ContentRef, FeedAlgo, FeedRef, MessageAlgo, MessageRef, StorageRef};
pub use scheduler::{cancel_pair, CancelHandle, CancelToken, RemoteFeedSource, Scheduler};
pub use sink::VerifySink;
pub use validator::validate_next;
