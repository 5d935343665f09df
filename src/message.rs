//! The uniform in-memory message view every codec produces (spec §3.2).

use serde::{Deserialize, Serialize};

use crate::refs::{FeedRef, MessageRef};

/// Caller-supplied content for an authoring path (spec §9 "Dynamic-typed
/// value in encode paths"). A systems-language stand-in for the reference
/// implementation's untyped `interface{}`/dynamic value: bytes are copied
/// verbatim, text is copied as UTF-8, and structured values are
/// canonicalised to JSON by the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Bytes(Vec<u8>),
    Text(String),
    Structured(serde_json::Value),
}

/// The structured per-format "value" record, suitable for serialising back
/// as JSON (spec §3.2 `value_view`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueView {
    pub previous: Option<String>,
    pub author: String,
    pub sequence: u64,
    pub timestamp: u64,
    pub hash: &'static str,
    pub content: serde_json::Value,
}

/// Uniform view consumed everywhere downstream of a codec (spec §3.2).
/// Implemented once per on-wire format, plus a forwarding impl on the
/// tagged-union [`crate::envelope::StoredEnvelope`] (spec §9 "Multi-format
/// polymorphism").
pub trait Message {
    fn key(&self) -> MessageRef;
    fn previous(&self) -> Option<MessageRef>;
    fn sequence(&self) -> u64;
    fn author(&self) -> FeedRef;
    /// Wall-clock time the message was received/appended locally. Per
    /// spec §3.2 and §9, this is NOT the claimed on-the-wire timestamp and
    /// MUST NOT be used for chain validation.
    fn timestamp(&self) -> u64;
    fn content_bytes(&self) -> &[u8];
    fn value_view(&self) -> ValueView;
}
