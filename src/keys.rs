//! Author key pairs. Deriving keys from a mnemonic or a key-invite protocol
//! is surrounding functionality (spec §6 "Environment/CLI"); this module
//! covers what the codecs need to sign and identify a feed, plus loading a
//! seed from the hex encoding an embedding application typically keeps in
//! config or the environment.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::refs::{FeedAlgo, FeedRef};

/// Errors loading a key pair from an external hex encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid hex seed: {0}")]
    BadHex(String),
    #[error("seed must be 32 bytes, got {0}")]
    WrongLength(usize),
}

/// An author's signing key plus the wire format it authors under. One
/// `FeedRef` (and therefore one algo) per key pair.
pub struct AuthorKeyPair {
    pub signing_key: SigningKey,
    pub algo: FeedAlgo,
}

impl AuthorKeyPair {
    pub fn generate(algo: FeedAlgo) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        AuthorKeyPair { signing_key, algo }
    }

    pub fn from_bytes(seed: [u8; 32], algo: FeedAlgo) -> Self {
        AuthorKeyPair { signing_key: SigningKey::from_bytes(&seed), algo }
    }

    /// Loads a key pair from a hex-encoded 32-byte seed, the form an
    /// embedding application typically reads from config or the environment.
    pub fn from_hex_seed(seed_hex: &str, algo: FeedAlgo) -> Result<Self, KeyError> {
        let bytes = hex::decode(seed_hex).map_err(|e| KeyError::BadHex(e.to_string()))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| KeyError::WrongLength(v.len()))?;
        Ok(Self::from_bytes(seed, algo))
    }

    pub fn to_hex_seed(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn feed_ref(&self) -> FeedRef {
        FeedRef::new(self.signing_key.verifying_key().to_bytes(), self.algo)
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing_key.sign(msg).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_ref_matches_verifying_key() {
        let kp = AuthorKeyPair::generate(FeedAlgo::LegacyEd25519);
        let fr = kp.feed_ref();
        assert_eq!(fr.id, kp.signing_key.verifying_key().to_bytes());
        assert_eq!(fr.algo, FeedAlgo::LegacyEd25519);
    }

    #[test]
    fn hex_seed_round_trips_to_the_same_feed_ref() {
        let kp = AuthorKeyPair::generate(FeedAlgo::CborEd25519);
        let seed_hex = kp.to_hex_seed();
        let reloaded = AuthorKeyPair::from_hex_seed(&seed_hex, FeedAlgo::CborEd25519).unwrap();
        assert_eq!(reloaded.feed_ref(), kp.feed_ref());
    }

    #[test]
    fn wrong_length_hex_seed_is_rejected() {
        let err = AuthorKeyPair::from_hex_seed("aabb", FeedAlgo::LegacyEd25519).unwrap_err();
        assert_eq!(err, KeyError::WrongLength(2));
    }
}
