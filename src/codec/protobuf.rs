//! Protobuf-binary codec (spec §4.1.2). Wire structure: a `Transfer{event,
//! signature, content}` where `event` is a protobuf `Event` whose
//! `previous`/`author`/`content.hash` are 33-byte `StorageRef`s.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use prost::Message as _;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CodecError;
use crate::hmac_auth;
use crate::keys::AuthorKeyPair;
use crate::message::{Content, Message, ValueView};
use crate::pb;
use crate::refs::{BlobRef, FeedAlgo, FeedRef, MessageAlgo, MessageRef, StorageRef};

#[derive(Debug, Clone)]
pub struct ProtoBody {
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

impl ProtoBody {
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl Message for ProtoBody {
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

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn content_to_json(content: &Content) -> Value {
    match content {
        Content::Bytes(b) => Value::String(B64.encode(b)),
        Content::Text(s) => Value::String(s.clone()),
        Content::Structured(v) => v.clone(),
    }
}

pub fn encode(
    author: &AuthorKeyPair,
    sequence: u64,
    previous: Option<MessageRef>,
    content: &Content,
    claimed_timestamp: u64,
    hmac_key: Option<&[u8; 32]>,
) -> Result<(ProtoBody, MessageRef), CodecError> {
    if sequence < 1 {
        return Err(CodecError::BadSequence);
    }
    if (sequence == 1) != previous.is_none() {
        return Err(CodecError::BadPrevious);
    }

    let author_ref = author.feed_ref();
    let content_value = content_to_json(content);
    let content_bytes = serde_json::to_vec(&content_value).expect("Value serialization is infallible");
    let content_hash = Sha256::digest(&content_bytes);

    let event = pb::Event {
        previous: previous.map(|p| StorageRef::Message(p).to_bytes().to_vec()).unwrap_or_default(),
        author: StorageRef::Feed(author_ref).to_bytes().to_vec(),
        sequence,
        content: Some(pb::Content {
            hash: StorageRef::Blob(BlobRef::new(content_hash.into())).to_bytes().to_vec(),
            size: content_bytes.len() as u64,
            r#type: pb::ContentType::Json as i32,
        }),
        timestamp: claimed_timestamp,
    };
    let event_bytes = event.encode_to_vec();

    let signed_bytes = match hmac_key {
        Some(k) => hmac_auth::sum(&event_bytes, k).to_vec(),
        None => event_bytes.clone(),
    };
    let signature = author.sign(&signed_bytes).to_vec();

    let key = MessageRef::new(
        Sha256::digest([event_bytes.as_slice(), signature.as_slice()].concat()).into(),
        MessageAlgo::Sha256,
    );

    let transfer = pb::Transfer { event: event_bytes, signature, content: content_bytes.clone() };
    let raw = transfer.encode_to_vec();

    let body = ProtoBody {
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
/// about a transfer except the signature check, which only `verify`
/// performs.
struct Parsed {
    signature: Signature,
    event_bytes: Vec<u8>,
    author: FeedRef,
    previous: Option<MessageRef>,
    sequence: u64,
    claimed_timestamp: u64,
    key: MessageRef,
    content: Value,
    content_bytes: Vec<u8>,
}

fn parse(raw: &[u8]) -> Result<Parsed, CodecError> {
    let transfer = pb::Transfer::decode(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let event = pb::Event::decode(transfer.event.as_slice())
        .map_err(|e| CodecError::Malformed(e.to_string()))?;

    let author_storage = StorageRef::from_bytes(&event.author)?;
    let author = match author_storage {
        StorageRef::Feed(fr) if fr.algo == FeedAlgo::ProtoEd25519 => fr,
        StorageRef::Feed(_) => return Err(CodecError::WrongFormat),
        _ => return Err(CodecError::Malformed("author field is not a feed ref".into())),
    };

    let sig_array: [u8; 64] = transfer
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CodecError::Malformed("signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_array);

    let previous = if event.previous.is_empty() {
        None
    } else {
        match StorageRef::from_bytes(&event.previous)? {
            StorageRef::Message(mr) => Some(mr),
            _ => return Err(CodecError::Malformed("previous field is not a message ref".into())),
        }
    };

    let pb_content = event.content.ok_or_else(|| CodecError::Malformed("missing content".into()))?;
    let content_hash = match StorageRef::from_bytes(&pb_content.hash)? {
        StorageRef::Blob(br) => br.hash,
        _ => return Err(CodecError::Malformed("content.hash is not a blob ref".into())),
    };
    if Sha256::digest(&transfer.content).as_slice() != content_hash {
        return Err(CodecError::ContentHashMismatch);
    }
    if transfer.content.len() as u64 != pb_content.size {
        return Err(CodecError::ContentSizeMismatch {
            expected: pb_content.size,
            got: transfer.content.len() as u64,
        });
    }

    if event.sequence < 1 {
        return Err(CodecError::BadSequence);
    }
    if (event.sequence == 1) != previous.is_none() {
        return Err(CodecError::BadPrevious);
    }

    let content: Value =
        serde_json::from_slice(&transfer.content).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let key = MessageRef::new(
        Sha256::digest([transfer.event.as_slice(), transfer.signature.as_slice()].concat()).into(),
        MessageAlgo::Sha256,
    );

    Ok(Parsed {
        signature,
        event_bytes: transfer.event,
        author,
        previous,
        sequence: event.sequence,
        claimed_timestamp: event.timestamp,
        key,
        content,
        content_bytes: transfer.content,
    })
}

pub fn verify(raw: &[u8], hmac_key: Option<&[u8; 32]>) -> Result<ProtoBody, CodecError> {
    let parsed = parse(raw)?;

    let verifying_key = VerifyingKey::from_bytes(&parsed.author.id)
        .map_err(|_| CodecError::Malformed("bad author key".into()))?;
    let signed_bytes = match hmac_key {
        Some(k) => hmac_auth::sum(&parsed.event_bytes, k).to_vec(),
        None => parsed.event_bytes.clone(),
    };
    verifying_key
        .verify(&signed_bytes, &parsed.signature)
        .map_err(|_| CodecError::SignatureInvalid)?;

    Ok(ProtoBody {
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
pub fn decode_stored(raw: &[u8], received_at: u64) -> Result<ProtoBody, CodecError> {
    let parsed = parse(raw)?;
    Ok(ProtoBody {
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
