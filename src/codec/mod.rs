//! Format codecs (spec §4.1): for each of {legacy-JSON, protobuf-binary,
//! CBOR-binary}, encode an authored event, verify a received event, and
//! expose a uniform [`crate::message::Message`] view.

pub mod cbor;
pub mod legacy;
pub mod protobuf;

use crate::envelope::StoredEnvelope;
use crate::error::CodecError;
use crate::keys::AuthorKeyPair;
use crate::message::Content;
use crate::refs::{FeedAlgo, MessageRef};

/// Dispatches to the codec matching `algo` (spec §4.4 step 1: "select the
/// codec by `feed_ref.algo`").
pub fn verify(algo: FeedAlgo, raw: &[u8], hmac_key: Option<&[u8; 32]>) -> Result<StoredEnvelope, CodecError> {
    match algo {
        FeedAlgo::LegacyEd25519 => legacy::verify(raw, hmac_key).map(StoredEnvelope::Legacy),
        FeedAlgo::ProtoEd25519 => protobuf::verify(raw, hmac_key).map(StoredEnvelope::Protobuf),
        FeedAlgo::CborEd25519 => cbor::verify(raw, hmac_key).map(StoredEnvelope::Cbor),
    }
}

/// Dispatches to the codec matching `author.algo` (spec §4.5 step 3). The
/// CBOR format carries no event-level timestamp (spec §4.1.3); callers still
/// pass `claimed_timestamp` uniformly and the CBOR codec ignores it.
pub fn encode(
    author: &AuthorKeyPair,
    sequence: u64,
    previous: Option<MessageRef>,
    content: &Content,
    claimed_timestamp: u64,
    hmac_key: Option<&[u8; 32]>,
) -> Result<(StoredEnvelope, MessageRef), CodecError> {
    match author.algo {
        FeedAlgo::LegacyEd25519 => {
            legacy::encode(author, sequence, previous, content, claimed_timestamp, hmac_key)
                .map(|(b, r)| (StoredEnvelope::Legacy(b), r))
        }
        FeedAlgo::ProtoEd25519 => {
            protobuf::encode(author, sequence, previous, content, claimed_timestamp, hmac_key)
                .map(|(b, r)| (StoredEnvelope::Protobuf(b), r))
        }
        FeedAlgo::CborEd25519 => {
            cbor::encode(author, sequence, previous, content, hmac_key)
                .map(|(b, r)| (StoredEnvelope::Cbor(b), r))
        }
    }
}
