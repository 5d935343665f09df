//! Typed identifiers for feeds, messages and blobs (spec §3.1, §6).
//!
//! Canonical string form: `sigil + base64(payload) + "." + algo-suffix`.
//! Compact binary form (`StorageRef`): 1 tag byte + 32 payload bytes, used
//! inside every signed binary structure (spec §3.1 "Invariants").
//!
//! The tag-byte assignment is one of the ambiguities spec.md §9 calls out
//! as having two drafts upstream; this crate freezes it as
//! `0x01`=legacy-feed, `0x02`=message, `0x03`=blob, `0x04`=protobuf-feed,
//! `0x05`=cbor-feed (see DESIGN.md).

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use crate::error::RefError;

const REF_LEN: usize = 32;
const STORAGE_REF_LEN: usize = 33;

/// Which wire format (and therefore which signature-binding rules) a feed
/// was authored under (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedAlgo {
    LegacyEd25519,
    ProtoEd25519,
    CborEd25519,
}

impl FeedAlgo {
    fn suffix(self) -> &'static str {
        match self {
            FeedAlgo::LegacyEd25519 => "ed25519",
            FeedAlgo::ProtoEd25519 => "proto-v1",
            FeedAlgo::CborEd25519 => "ggfeed-v1",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "ed25519" => Some(FeedAlgo::LegacyEd25519),
            "proto-v1" => Some(FeedAlgo::ProtoEd25519),
            "ggfeed-v1" => Some(FeedAlgo::CborEd25519),
            _ => None,
        }
    }

    fn storage_tag(self) -> u8 {
        match self {
            FeedAlgo::LegacyEd25519 => 0x01,
            FeedAlgo::ProtoEd25519 => 0x04,
            FeedAlgo::CborEd25519 => 0x05,
        }
    }

    fn from_storage_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(FeedAlgo::LegacyEd25519),
            0x04 => Some(FeedAlgo::ProtoEd25519),
            0x05 => Some(FeedAlgo::CborEd25519),
            _ => None,
        }
    }
}

/// A feed's identity: an Ed25519 public key plus the wire format it authors
/// under (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedRef {
    pub id: [u8; 32],
    pub algo: FeedAlgo,
}

impl FeedRef {
    pub fn new(id: [u8; 32], algo: FeedAlgo) -> Self {
        FeedRef { id, algo }
    }

    /// Canonical string form, e.g. `@<base64>.ed25519`.
    pub fn to_ref_string(&self) -> String {
        format!("@{}.{}", B64.encode(self.id), self.algo.suffix())
    }

    /// The key used by `UserFeeds` to look up a feed's sub-log (spec §4.6).
    /// Distinguishes algorithm variants because it's just the canonical
    /// string form.
    pub fn storage_addr(&self) -> String {
        self.to_ref_string()
    }

    pub fn parse(s: &str) -> Result<Self, RefError> {
        let (hash, algo) = parse_sigil(s, '@')?;
        let algo = FeedAlgo::from_suffix(&algo).ok_or(RefError::RefParse)?;
        let id: [u8; 32] = hash
            .try_into()
            .map_err(|v: Vec<u8>| RefError::RefLength { algo: "feed", len: v.len() })?;
        Ok(FeedRef { id, algo })
    }
}

/// Which sha256-derived suffix a message ref prints with. Both variants are
/// the same 32-byte SHA-256 hash (spec §3.1); the suffix is wire-format
/// convention inherited from the format that produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageAlgo {
    Sha256,
    GgMsgV1,
}

impl MessageAlgo {
    fn suffix(self) -> &'static str {
        match self {
            MessageAlgo::Sha256 => "sha256",
            MessageAlgo::GgMsgV1 => "ggmsg-v1",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(MessageAlgo::Sha256),
            "ggmsg-v1" => Some(MessageAlgo::GgMsgV1),
            _ => None,
        }
    }
}

/// Content-addressed identity of a message (spec §3.1, §3.2).
///
/// Equality and hashing consider only `hash`, not `algo`. The `.sha256`/
/// `.ggmsg-v1` suffix is a display-only wire-format hint — `StorageRef`'s
/// single "message" tag byte (spec §3.1, §6) can't carry it, so
/// `unmarshal(marshal(r))` always comes back tagged `Sha256` regardless of
/// which suffix `r` was minted with. Treating the suffix as part of the
/// ref's identity would make that a `PreviousMismatch`/fail a round trip for
/// any ref originally minted as `ggmsg-v1` (spec P1, P3); excluding it from
/// equality keeps both properties true without inventing a wider binary
/// tag space the spec doesn't define.
#[derive(Debug, Clone, Copy)]
pub struct MessageRef {
    pub hash: [u8; 32],
    pub algo: MessageAlgo,
}

impl PartialEq for MessageRef {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for MessageRef {}

impl std::hash::Hash for MessageRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl MessageRef {
    pub fn new(hash: [u8; 32], algo: MessageAlgo) -> Self {
        MessageRef { hash, algo }
    }

    pub fn to_ref_string(&self) -> String {
        format!("%{}.{}", B64.encode(self.hash), self.algo.suffix())
    }

    pub fn parse(s: &str) -> Result<Self, RefError> {
        let (hash, algo) = parse_sigil(s, '%')?;
        let algo = MessageAlgo::from_suffix(&algo).ok_or(RefError::RefParse)?;
        let hash: [u8; 32] = hash
            .try_into()
            .map_err(|v: Vec<u8>| RefError::RefLength { algo: "message", len: v.len() })?;
        Ok(MessageRef { hash, algo })
    }
}

/// A blob (or generic content) reference; same shape as `MessageRef`,
/// distinguished only by sigil (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub hash: [u8; 32],
}

impl BlobRef {
    pub fn new(hash: [u8; 32]) -> Self {
        BlobRef { hash }
    }

    pub fn to_ref_string(&self) -> String {
        format!("&{}.sha256", B64.encode(self.hash))
    }

    pub fn parse(s: &str) -> Result<Self, RefError> {
        let (hash, algo) = parse_sigil(s, '&')?;
        if algo != "sha256" {
            return Err(RefError::RefParse);
        }
        let hash: [u8; 32] = hash
            .try_into()
            .map_err(|v: Vec<u8>| RefError::RefLength { algo: "blob", len: v.len() })?;
        Ok(BlobRef { hash })
    }
}

/// `ContentRef` is the same shape as `BlobRef`; an alias per spec §3.1
/// ("distinguished only by the sigil used in the canonical string form").
pub type ContentRef = BlobRef;

fn parse_sigil(s: &str, sigil: char) -> Result<(Vec<u8>, String), RefError> {
    let mut chars = s.chars();
    if chars.next() != Some(sigil) {
        return Err(RefError::RefParse);
    }
    let rest = chars.as_str();
    let dot = rest.find('.').ok_or(RefError::RefParse)?;
    let (b64_part, suffix_part) = rest.split_at(dot);
    let suffix = &suffix_part[1..];
    let raw = B64.decode(b64_part).map_err(|_| RefError::RefParse)?;
    Ok((raw, suffix.to_string()))
}

/// One of {feed, message, blob} carried inside a signed binary structure
/// (spec §3.1). Exactly one variant is ever present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageRef {
    Feed(FeedRef),
    Message(MessageRef),
    Blob(BlobRef),
}

impl StorageRef {
    pub fn to_bytes(&self) -> [u8; STORAGE_REF_LEN] {
        let mut out = [0u8; STORAGE_REF_LEN];
        match self {
            StorageRef::Feed(fr) => {
                out[0] = fr.algo.storage_tag();
                out[1..].copy_from_slice(&fr.id);
            }
            StorageRef::Message(mr) => {
                out[0] = 0x02;
                out[1..].copy_from_slice(&mr.hash);
            }
            StorageRef::Blob(br) => {
                out[0] = 0x03;
                out[1..].copy_from_slice(&br.hash);
            }
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, RefError> {
        if data.len() != STORAGE_REF_LEN {
            return Err(RefError::RefLength { algo: "storage-ref", len: data.len() });
        }
        let payload: [u8; 32] = data[1..].try_into().expect("checked length above");
        match data[0] {
            0x02 => Ok(StorageRef::Message(MessageRef::new(payload, MessageAlgo::Sha256))),
            0x03 => Ok(StorageRef::Blob(BlobRef::new(payload))),
            tag => match FeedAlgo::from_storage_tag(tag) {
                Some(algo) => Ok(StorageRef::Feed(FeedRef::new(payload, algo))),
                None => Err(RefError::UnknownTag(tag)),
            },
        }
    }
}
