//! NaCl `crypto_auth`-compatible signing-domain separation (spec §4.1,
//! glossary "HMAC domain"): HMAC-SHA-512-256, i.e. HMAC-SHA-512 truncated to
//! the first 32 bytes of its tag.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// `auth.Sum(msg, key)`: a 32-byte key, a 32-byte tag.
pub fn sum(msg: &[u8], key: &[u8; 32]) -> [u8; 32] {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key).expect("any key length is valid for HMAC");
    mac.update(msg);
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&full[..32]);
    out
}
