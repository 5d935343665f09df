//! Legacy-JSON codec (spec §4.1.1).
//!
//! The signing domain is the insertion-order-preserving JSON encoding of the
//! envelope object with the `signature` field omitted. Implementations MUST
//! NOT re-serialize a received message before verifying it — the signature
//! covers the exact received bytes, not any canonical re-rendering.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CodecError;
use crate::hmac_auth;
use crate::keys::AuthorKeyPair;
use crate::message::{Content, Message, ValueView};
use crate::refs::{FeedAlgo, FeedRef, MessageAlgo, MessageRef};

/// A verified or freshly authored legacy-JSON message, keeping the exact
/// received/produced bytes around (spec §3.3: the stored envelope preserves
/// the original bytes verbatim).
#[derive(Debug, Clone)]
pub struct LegacyBody {
    raw: Vec<u8>,
    key: MessageRef,
    previous: Option<MessageRef>,
    author: FeedRef,
    sequence: u64,
    claimed_timestamp: u64,
    received_at: u64,
    content: Value,
    content_bytes: Vec<u8>,
}

impl LegacyBody {
    /// The exact JSON bytes this message round-trips to (spec §3.3).
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn from_raw_parts(raw: Vec<u8>, received_at: u64) -> Result<Self, CodecError> {
        decode_stored(&raw, received_at)
    }
}

impl Message for LegacyBody {
    fn key(&self) -> MessageRef {
        self.key
    }
    fn previous(&self) -> Option<MessageRef> {
        self.previous
    }
    fn sequence(&self) -> u64 {
        self.sequence
    }
    fn author(&self) -> FeedRef {
        self.author
    }
    fn timestamp(&self) -> u64 {
        self.received_at
    }
    fn content_bytes(&self) -> &[u8] {
        &self.content_bytes
    }
    fn value_view(&self) -> ValueView {
        ValueView {
            previous: self.previous.map(|p| p.to_ref_string()),
            author: self.author.to_ref_string(),
            sequence: self.sequence,
            timestamp: self.claimed_timestamp,
            hash: "sha256",
            content: self.content.clone(),
        }
    }
}

/// Serialises `value` the way the ecosystem's JS-compatible encoder does:
/// insertion-order-preserved object keys, 2-space indentation. Exposed
/// standalone (spec §9 "preservation of wire bytes") so callers that need
/// to re-derive the exact signed byte string for diagnostics can do so
/// without reimplementing the encoder.
pub fn encode_preserve_order(value: &Value) -> Vec<u8> {
    serde_json::to_vec_pretty(value).expect("Value serialization is infallible")
}

fn content_to_value(content: &Content) -> Value {
    match content {
        Content::Bytes(b) => Value::String(B64.encode(b)),
        Content::Text(s) => Value::String(s.clone()),
        Content::Structured(v) => v.clone(),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `encode(author_keypair, sequence, previous, content_value) -> (stored, MessageRef)`
/// (spec §4.1).
pub fn encode(
    author: &AuthorKeyPair,
    sequence: u64,
    previous: Option<MessageRef>,
    content: &Content,
    claimed_timestamp: u64,
    hmac_key: Option<&[u8; 32]>,
) -> Result<(LegacyBody, MessageRef), CodecError> {
    if sequence < 1 {
        return Err(CodecError::BadSequence);
    }
    if (sequence == 1) != previous.is_none() {
        return Err(CodecError::BadPrevious);
    }

    let author_ref = author.feed_ref();
    let content_value = content_to_value(content);

    let mut obj = Map::new();
    obj.insert(
        "previous".into(),
        previous.map(|p| Value::String(p.to_ref_string())).unwrap_or(Value::Null),
    );
    obj.insert("author".into(), Value::String(author_ref.to_ref_string()));
    obj.insert("sequence".into(), Value::from(sequence));
    obj.insert("timestamp".into(), Value::from(claimed_timestamp));
    obj.insert("hash".into(), Value::String("sha256".into()));
    obj.insert("content".into(), content_value.clone());

    let unsigned_bytes = encode_preserve_order(&Value::Object(obj.clone()));
    let signed_bytes = match hmac_key {
        Some(k) => hmac_auth::sum(&unsigned_bytes, k).to_vec(),
        None => unsigned_bytes,
    };
    let sig = author.sign(&signed_bytes);
    obj.insert("signature".into(), Value::String(format!("{}.sig.ed25519", B64.encode(sig))));

    let raw = encode_preserve_order(&Value::Object(obj));
    let key = MessageRef::new(Sha256::digest(&raw).into(), MessageAlgo::Sha256);
    let content_bytes = serde_json::to_vec(&content_value).expect("Value serialization is infallible");

    let body = LegacyBody {
        raw,
        key,
        previous,
        author: author_ref,
        sequence,
        claimed_timestamp,
        received_at: now_millis(),
        content: content_value,
        content_bytes,
    };
    Ok((body, key))
}

/// Structural fields shared by `verify` and `decode_stored` — everything
/// about a legacy-JSON message except the signature check, which only
/// `verify` performs.
struct Parsed {
    signature: Signature,
    unsigned_bytes: Vec<u8>,
    author: FeedRef,
    previous: Option<MessageRef>,
    sequence: u64,
    claimed_timestamp: u64,
    key: MessageRef,
    content: Value,
    content_bytes: Vec<u8>,
}

fn parse(raw: &[u8]) -> Result<Parsed, CodecError> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let mut obj = match value {
        Value::Object(m) => m,
        _ => return Err(CodecError::Malformed("not a JSON object".into())),
    };

    let sig_str = obj
        .remove("signature")
        .and_then(|v| v.as_str().map(str::to_owned))
        .ok_or_else(|| CodecError::Malformed("missing signature field".into()))?;
    let sig_b64 = sig_str
        .strip_suffix(".sig.ed25519")
        .ok_or_else(|| CodecError::Malformed("unsupported signature suffix".into()))?;
    let sig_bytes = B64.decode(sig_b64).map_err(|_| CodecError::Malformed("bad signature base64".into()))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CodecError::Malformed("signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_array);

    let unsigned_bytes = encode_preserve_order(&Value::Object(obj.clone()));

    let author_str = obj
        .get("author")
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::Malformed("missing author field".into()))?;
    let author = FeedRef::parse(author_str)?;
    if author.algo != FeedAlgo::LegacyEd25519 {
        return Err(CodecError::WrongFormat);
    }

    let previous = match obj.get("previous") {
        Some(Value::String(s)) => Some(MessageRef::parse(s)?),
        Some(Value::Null) | None => None,
        _ => return Err(CodecError::Malformed("previous must be a string or null".into())),
    };
    let sequence = obj
        .get("sequence")
        .and_then(Value::as_u64)
        .ok_or_else(|| CodecError::Malformed("missing sequence field".into()))?;
    if sequence < 1 {
        return Err(CodecError::BadSequence);
    }
    if (sequence == 1) != previous.is_none() {
        return Err(CodecError::BadPrevious);
    }
    let claimed_timestamp = obj.get("timestamp").and_then(Value::as_u64).unwrap_or(0);
    let content = obj
        .get("content")
        .cloned()
        .ok_or_else(|| CodecError::Malformed("missing content field".into()))?;
    let content_bytes = serde_json::to_vec(&content).expect("Value serialization is infallible");

    let key = MessageRef::new(Sha256::digest(raw).into(), MessageAlgo::Sha256);

    Ok(Parsed {
        signature,
        unsigned_bytes,
        author,
        previous,
        sequence,
        claimed_timestamp,
        key,
        content,
        content_bytes,
    })
}

/// `verify(raw_bytes) -> Message | signature/parse error` (spec §4.1).
pub fn verify(raw: &[u8], hmac_key: Option<&[u8; 32]>) -> Result<LegacyBody, CodecError> {
    let parsed = parse(raw)?;

    let verifying_key = VerifyingKey::from_bytes(&parsed.author.id)
        .map_err(|_| CodecError::Malformed("bad author key".into()))?;
    let signed_bytes = match hmac_key {
        Some(k) => hmac_auth::sum(&parsed.unsigned_bytes, k).to_vec(),
        None => parsed.unsigned_bytes,
    };
    verifying_key
        .verify(&signed_bytes, &parsed.signature)
        .map_err(|_| CodecError::SignatureInvalid)?;

    Ok(LegacyBody {
        raw: raw.to_vec(),
        key: parsed.key,
        previous: parsed.previous,
        author: parsed.author,
        sequence: parsed.sequence,
        claimed_timestamp: parsed.claimed_timestamp,
        received_at: now_millis(),
        content: parsed.content,
        content_bytes: parsed.content_bytes,
    })
}

/// Reconstructs a body from bytes already verified once at ingestion time
/// (spec §5/§7 crash recovery): skips signature verification and trusts the
/// caller-supplied receive timestamp instead of resetting it to "now".
pub fn decode_stored(raw: &[u8], received_at: u64) -> Result<LegacyBody, CodecError> {
    let parsed = parse(raw)?;
    Ok(LegacyBody {
        raw: raw.to_vec(),
        key: parsed.key,
        previous: parsed.previous,
        author: parsed.author,
        sequence: parsed.sequence,
        claimed_timestamp: parsed.claimed_timestamp,
        received_at,
        content: parsed.content,
        content_bytes: parsed.content_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::FeedAlgo;

    #[test]
    fn encode_then_verify_round_trips() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let content = Content::Structured(serde_json::json!({"type": "test", "seq": 0}));
        let (body, msg_ref) = encode(&kp, 1, None, &content, 1_700_000_000_000, None).unwrap();
        assert_eq!(body.key(), msg_ref);

        let verified = verify(body.raw(), None).unwrap();
        assert_eq!(verified.key(), msg_ref);
        assert_eq!(verified.author(), kp.feed_ref());
        assert_eq!(verified.sequence(), 1);
        assert!(verified.previous().is_none());
    }

    #[test]
    fn tampered_content_fails_verification() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let content = Content::Text("hello".into());
        let (body, _) = encode(&kp, 1, None, &content, 0, None).unwrap();

        let mut tampered: Value = serde_json::from_slice(body.raw()).unwrap();
        tampered["content"] = Value::String("goodbye".into());
        let tampered_bytes = serde_json::to_vec(&tampered).unwrap();

        assert!(matches!(verify(&tampered_bytes, None), Err(CodecError::SignatureInvalid)));
    }

    #[test]
    fn hmac_domain_requires_matching_key() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let content = Content::Text("hello".into());
        let key = [7u8; 32];
        let (body, _) = encode(&kp, 1, None, &content, 0, Some(&key)).unwrap();

        assert!(verify(body.raw(), Some(&key)).is_ok());
        assert!(matches!(verify(body.raw(), None), Err(CodecError::SignatureInvalid)));
        assert!(matches!(verify(body.raw(), Some(&[9u8; 32])), Err(CodecError::SignatureInvalid)));
    }

    #[test]
    fn decode_stored_skips_signature_check_and_keeps_given_timestamp() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let key = [8u8; 32];
        let content = Content::Text("hello".into());
        let (body, msg_ref) = encode(&kp, 1, None, &content, 0, Some(&key)).unwrap();

        let decoded = LegacyBody::from_raw_parts(body.raw().to_vec(), 99).unwrap();
        assert_eq!(decoded.key(), msg_ref);
        assert_eq!(decoded.timestamp(), 99);
    }

    #[test]
    fn bad_sequence_previous_pairing_is_rejected() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let content = Content::Text("x".into());
        assert!(matches!(encode(&kp, 0, None, &content, 0, None), Err(CodecError::BadSequence)));

        let prev = MessageRef::new([1u8; 32], MessageAlgo::Sha256);
        assert!(matches!(encode(&kp, 1, Some(prev), &content, 0, None), Err(CodecError::BadPrevious)));
    }
}
