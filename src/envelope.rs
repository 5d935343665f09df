//! Uniform message envelope (spec §4.2, §3.3): a tagged union over the
//! three on-disk formats, stored as
//! `[tag_byte] ‖ [8-byte big-endian received_at] ‖ format_body`. Preserves
//! each format's original bytes and receive timestamp, so a round trip
//! through storage reproduces every attribute (spec P2) without
//! re-deriving a fresh timestamp or re-verifying a signature that may have
//! been produced under an HMAC key no longer on hand (spec §5/§7 crash
//! recovery).

use crate::codec::{cbor::CborBody, legacy::LegacyBody, protobuf::ProtoBody};
use crate::error::CodecError;
use crate::message::{Message, ValueView};
use crate::refs::{FeedRef, MessageRef};

const TAG_LEGACY: u8 = 0x01;
const TAG_PROTOBUF: u8 = 0x02;
const TAG_CBOR: u8 = 0x03;

/// `enum StoredMessage { Legacy(LegacyBody), Protobuf(ProtoBody),
/// Cbor(CborBody) }` (spec §9 "multi-format polymorphism"). Implements
/// `Message` once, by delegation to whichever variant is present.
#[derive(Debug, Clone)]
pub enum StoredEnvelope {
    Legacy(LegacyBody),
    Protobuf(ProtoBody),
    Cbor(CborBody),
}

impl StoredEnvelope {
    pub fn marshal_binary(&self) -> Vec<u8> {
        let (tag, received_at, body): (u8, u64, &[u8]) = match self {
            StoredEnvelope::Legacy(b) => (TAG_LEGACY, b.timestamp(), b.raw()),
            StoredEnvelope::Protobuf(b) => (TAG_PROTOBUF, b.timestamp(), b.raw()),
            StoredEnvelope::Cbor(b) => (TAG_CBOR, b.timestamp(), b.raw()),
        };
        let mut out = Vec::with_capacity(9 + body.len());
        out.push(tag);
        out.extend_from_slice(&received_at.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Self, CodecError> {
        let (tag, rest) = data
            .split_first()
            .ok_or_else(|| CodecError::Malformed("empty envelope".into()))?;
        if rest.len() < 8 {
            return Err(CodecError::Malformed("envelope missing received_at".into()));
        }
        let (received_at_bytes, body) = rest.split_at(8);
        let received_at = u64::from_be_bytes(
            received_at_bytes.try_into().expect("split_at(8) yields an 8-byte slice"),
        );
        // Reconstructs the variant without re-verifying signatures: this
        // data already passed through `verify` once at ingestion time, and
        // re-checking here would both reset the receive timestamp and
        // require an HMAC key that a reload from local storage may not have.
        match *tag {
            TAG_LEGACY => {
                crate::codec::legacy::decode_stored(body, received_at).map(StoredEnvelope::Legacy)
            }
            TAG_PROTOBUF => {
                crate::codec::protobuf::decode_stored(body, received_at).map(StoredEnvelope::Protobuf)
            }
            TAG_CBOR => crate::codec::cbor::decode_stored(body, received_at).map(StoredEnvelope::Cbor),
            other => Err(CodecError::Malformed(format!("unknown envelope tag {other:#04x}"))),
        }
    }

    /// Borrows the Legacy body, or fails with `WrongFormat` (spec §4.2).
    pub fn as_legacy(&self) -> Result<&LegacyBody, CodecError> {
        match self {
            StoredEnvelope::Legacy(b) => Ok(b),
            _ => Err(CodecError::WrongFormat),
        }
    }

    pub fn as_protobuf(&self) -> Result<&ProtoBody, CodecError> {
        match self {
            StoredEnvelope::Protobuf(b) => Ok(b),
            _ => Err(CodecError::WrongFormat),
        }
    }

    pub fn as_cbor(&self) -> Result<&CborBody, CodecError> {
        match self {
            StoredEnvelope::Cbor(b) => Ok(b),
            _ => Err(CodecError::WrongFormat),
        }
    }
}

impl Message for StoredEnvelope {
    fn key(&self) -> MessageRef {
        match self {
            StoredEnvelope::Legacy(b) => b.key(),
            StoredEnvelope::Protobuf(b) => b.key(),
            StoredEnvelope::Cbor(b) => b.key(),
        }
    }
    fn previous(&self) -> Option<MessageRef> {
        match self {
            StoredEnvelope::Legacy(b) => b.previous(),
            StoredEnvelope::Protobuf(b) => b.previous(),
            StoredEnvelope::Cbor(b) => b.previous(),
        }
    }
    fn sequence(&self) -> u64 {
        match self {
            StoredEnvelope::Legacy(b) => b.sequence(),
            StoredEnvelope::Protobuf(b) => b.sequence(),
            StoredEnvelope::Cbor(b) => b.sequence(),
        }
    }
    fn author(&self) -> FeedRef {
        match self {
            StoredEnvelope::Legacy(b) => b.author(),
            StoredEnvelope::Protobuf(b) => b.author(),
            StoredEnvelope::Cbor(b) => b.author(),
        }
    }
    fn timestamp(&self) -> u64 {
        match self {
            StoredEnvelope::Legacy(b) => b.timestamp(),
            StoredEnvelope::Protobuf(b) => b.timestamp(),
            StoredEnvelope::Cbor(b) => b.timestamp(),
        }
    }
    fn content_bytes(&self) -> &[u8] {
        match self {
            StoredEnvelope::Legacy(b) => b.content_bytes(),
            StoredEnvelope::Protobuf(b) => b.content_bytes(),
            StoredEnvelope::Cbor(b) => b.content_bytes(),
        }
    }
    fn value_view(&self) -> ValueView {
        match self {
            StoredEnvelope::Legacy(b) => b.value_view(),
            StoredEnvelope::Protobuf(b) => b.value_view(),
            StoredEnvelope::Cbor(b) => b.value_view(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AuthorKeyPair;
    use crate::message::Content;
    use crate::refs::FeedAlgo;

    #[test]
    fn round_trips_each_variant() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let content = Content::Text("hi".into());
        let (body, _) = crate::codec::legacy::encode(&kp, 1, None, &content, 0, None).unwrap();
        let envelope = StoredEnvelope::Legacy(body);

        let marshaled = envelope.marshal_binary();
        assert_eq!(marshaled[0], TAG_LEGACY);
        let back = StoredEnvelope::unmarshal_binary(&marshaled).unwrap();
        assert_eq!(back.key(), envelope.key());
        assert_eq!(back.author(), envelope.author());
    }

    #[test]
    fn unmarshal_preserves_received_at_without_reverifying() {
        let kp = AuthorKeyPair::generate(FeedAlgo::CborEd25519);
        let hmac_key = [4u8; 32];
        let content = Content::Text("hi".into());
        let (body, _) = crate::codec::cbor::encode(&kp, 1, None, &content, Some(&hmac_key)).unwrap();
        let original_received_at = body.timestamp();
        let envelope = StoredEnvelope::Cbor(body);

        let marshaled = envelope.marshal_binary();
        // No HMAC key is threaded through `unmarshal_binary` at all — a
        // reload that had to re-verify against the original signing domain
        // would fail here.
        let back = StoredEnvelope::unmarshal_binary(&marshaled).unwrap();
        assert_eq!(back.timestamp(), original_received_at);
        assert_eq!(back.key(), envelope.key());
    }

    #[test]
    fn wrong_variant_accessor_fails() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let content = Content::Text("hi".into());
        let (body, _) = crate::codec::legacy::encode(&kp, 1, None, &content, 0, None).unwrap();
        let envelope = StoredEnvelope::Legacy(body);

        assert!(envelope.as_legacy().is_ok());
        assert!(matches!(envelope.as_cbor(), Err(CodecError::WrongFormat)));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let data = vec![0xffu8, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3];
        assert!(matches!(StoredEnvelope::unmarshal_binary(&data), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let data = vec![TAG_LEGACY, 0, 0, 0];
        assert!(matches!(StoredEnvelope::unmarshal_binary(&data), Err(CodecError::Malformed(_))));
    }
}
