//! Per-reader key wrapping (the asymmetric half of the hybrid scheme).
//!
//! Seals a message's one-time AES key to a single reader:
//!
//!   eph        = fresh X25519 keypair
//!   shared     = DH(eph_secret, reader_public)
//!   wrap_key   = HKDF-SHA256(ikm = shared, salt = eph_pub || reader_pub,
//!                            info = "closer-key-wrap-v1")
//!   blob       = eph_pub (32) || nonce (12) || AES-256-GCM(message_key)
//!
//! Only this small blob is produced once per reader; the message body is
//! encrypted exactly once regardless of fanout width.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};

const WRAP_INFO: &[u8] = b"closer-key-wrap-v1";
const EPH_LEN: usize = 32;
const NONCE_LEN: usize = 12;

fn derive_wrap_key(
    shared: &[u8],
    eph_pub: &[u8; 32],
    reader_pub: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(eph_pub);
    salt[32..].copy_from_slice(reader_pub);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(WRAP_INFO, key.as_mut())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok(key)
}

/// Seal a 32-byte message key to one reader's public key.
pub fn wrap_key(message_key: &[u8; 32], reader: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let eph_secret = EphemeralSecret::random_from_rng(OsRng);
    let eph_pub = X25519Public::from(&eph_secret);
    let reader_pub = X25519Public::from(reader.0);

    let shared = eph_secret.diffie_hellman(&reader_pub);
    let wrap = derive_wrap_key(shared.as_bytes(), &eph_pub.to_bytes(), &reader.0)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(wrap.as_ref()));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), message_key.as_slice())
        .map_err(|e| CryptoError::Encryption(format!("key wrap failed: {}", e)))?;

    let mut blob = Vec::with_capacity(EPH_LEN + NONCE_LEN + sealed.len());
    blob.extend_from_slice(eph_pub.as_bytes());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Recover a message key from a wrapped blob using the viewer's static
/// secret.
pub fn unwrap_key(blob: &[u8], viewer: &KeyPair) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    if blob.len() < EPH_LEN + NONCE_LEN {
        return Err(CryptoError::Decryption);
    }
    let (eph_bytes, rest) = blob.split_at(EPH_LEN);
    let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);

    let eph_pub: [u8; 32] = eph_bytes
        .try_into()
        .map_err(|_| CryptoError::Decryption)?;

    let shared = viewer.secret().diffie_hellman(&X25519Public::from(eph_pub));
    let wrap = derive_wrap_key(shared.as_bytes(), &eph_pub, &viewer.public().0)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(wrap.as_ref()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| CryptoError::Decryption)?;

    let key: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::Decryption)?;
    Ok(Zeroizing::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_message_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let reader = KeyPair::generate().unwrap();
        let message_key = random_message_key();

        let blob = wrap_key(&message_key, reader.public()).unwrap();
        let recovered = unwrap_key(&blob, &reader).unwrap();
        assert_eq!(recovered.as_ref(), &message_key);
    }

    #[test]
    fn wrong_reader_cannot_unwrap() {
        let reader = KeyPair::generate().unwrap();
        let intruder = KeyPair::generate().unwrap();
        let blob = wrap_key(&random_message_key(), reader.public()).unwrap();
        assert!(matches!(
            unwrap_key(&blob, &intruder),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let reader = KeyPair::generate().unwrap();
        let blob = wrap_key(&random_message_key(), reader.public()).unwrap();
        assert!(unwrap_key(&blob[..20], &reader).is_err());
    }

    #[test]
    fn tampered_blob_is_rejected() {
        let reader = KeyPair::generate().unwrap();
        let mut blob = wrap_key(&random_message_key(), reader.public()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(unwrap_key(&blob, &reader).is_err());
    }
}
