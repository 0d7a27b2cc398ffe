//! Transport transcoding and integrity hashing.
//!
//! Every binary envelope field (ciphertext, IV, wrapped keys) crosses the
//! wire and the persistence boundary as standard base64. The integrity
//! "signature" is the lowercase-hex SHA-256 of the plaintext: it detects
//! transport corruption, but anyone who can read the plaintext can
//! recompute it, so it authenticates nothing about the sender.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Deterministic one-way digest of a message body, lowercase hex.
pub fn hash_text(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Recompute-and-compare integrity check. True only on exact match.
pub fn verify_signature(plaintext: &str, stored: &str) -> bool {
    hash_text(plaintext) == stored
}

/// Encode bytes for the wire.
pub fn to_transport(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a wire field back to bytes.
pub fn from_transport(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(BASE64.decode(encoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_round_trip() {
        let cases: [&[u8]; 4] = [b"", b"\x00", b"hello", &[0xff, 0x00, 0x7f, 0x80]];
        for bytes in cases {
            assert_eq!(from_transport(&to_transport(bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn hash_is_deterministic_hex() {
        let a = hash_text("hello");
        let b = hash_text("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn verify_rejects_altered_text() {
        let sig = hash_text("hello");
        assert!(verify_signature("hello", &sig));
        assert!(!verify_signature("hello!", &sig));
    }

    #[test]
    fn bad_base64_is_an_error() {
        assert!(from_transport("not//valid!!base64~~").is_err());
    }
}
