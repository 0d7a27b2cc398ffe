//! Direct-message cipher: hybrid encryption for exactly two readers.
//!
//! The message body is encrypted once with a fresh AES-256-GCM key; the
//! key is wrapped twice — under the recipient's public key and under the
//! sender's own, so the sender can re-read sent messages without keeping
//! the plaintext around.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};

use closer_types::envelope::{DirectEnvelope, SealedDirect};

use crate::codec;
use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};
use crate::wrap;

const IV_LEN: usize = 12;

pub(crate) fn fresh_message_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

pub(crate) fn fresh_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

pub(crate) fn symmetric_encrypt(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    plaintext: &str,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

pub(crate) fn symmetric_decrypt(
    key: &[u8; 32],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<String, CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::Decryption);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Decryption)?;
    Ok(String::from_utf8(plaintext)?)
}

/// Encrypt a direct message for the recipient and the sender's self-copy.
pub fn encrypt_direct(
    plaintext: &str,
    recipient: &PublicKey,
    sender: &KeyPair,
) -> Result<SealedDirect, CryptoError> {
    let message_key = fresh_message_key();
    let iv = fresh_iv();

    let ciphertext = symmetric_encrypt(&message_key, &iv, plaintext)?;
    let recipient_wrapped = wrap::wrap_key(&message_key, recipient)?;
    let sender_wrapped = wrap::wrap_key(&message_key, sender.public())?;

    Ok(SealedDirect {
        text: codec::to_transport(&ciphertext),
        envelope: DirectEnvelope {
            is_encrypted: true,
            encrypted_key: Some(codec::to_transport(&recipient_wrapped)),
            sender_encrypted_key: Some(codec::to_transport(&sender_wrapped)),
            iv: Some(codec::to_transport(&iv)),
            signature: Some(codec::hash_text(plaintext)),
            sender_public_key: Some(sender.public_b64()),
        },
    })
}

/// Decrypt a direct message, selecting the wrapped-key slot that matches
/// the viewer's role in the conversation.
pub fn decrypt_direct(
    text: &str,
    envelope: &DirectEnvelope,
    viewer: &KeyPair,
    viewer_is_sender: bool,
) -> Result<String, CryptoError> {
    let slot = if viewer_is_sender {
        envelope.sender_encrypted_key.as_deref()
    } else {
        envelope.encrypted_key.as_deref()
    };
    let wrapped = slot.ok_or(CryptoError::NoKeyForViewer)?;

    let wrapped = codec::from_transport(wrapped)?;
    let iv = codec::from_transport(envelope.iv.as_deref().ok_or(CryptoError::Decryption)?)?;
    let ciphertext = codec::from_transport(text)?;

    let message_key = wrap::unwrap_key(&wrapped, viewer)?;
    symmetric_decrypt(&message_key, &iv, &ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::verify_signature;

    #[test]
    fn recipient_round_trip() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();

        let sealed = encrypt_direct("hello", recipient.public(), &sender).unwrap();
        assert!(sealed.envelope.is_encrypted);
        assert_ne!(sealed.text, "hello");

        let plaintext = decrypt_direct(&sealed.text, &sealed.envelope, &recipient, false).unwrap();
        assert_eq!(plaintext, "hello");
        assert!(verify_signature(
            &plaintext,
            sealed.envelope.signature.as_deref().unwrap()
        ));
    }

    #[test]
    fn sender_reads_own_message_via_self_slot() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();

        let sealed = encrypt_direct("for later", recipient.public(), &sender).unwrap();
        let plaintext = decrypt_direct(&sealed.text, &sealed.envelope, &sender, true).unwrap();
        assert_eq!(plaintext, "for later");
    }

    #[test]
    fn missing_slot_is_no_key_for_viewer() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();

        let mut sealed = encrypt_direct("hi", recipient.public(), &sender).unwrap();
        sealed.envelope.sender_encrypted_key = None;

        assert!(matches!(
            decrypt_direct(&sealed.text, &sealed.envelope, &sender, true),
            Err(CryptoError::NoKeyForViewer)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();

        let sealed = encrypt_direct("attack at dawn", recipient.public(), &sender).unwrap();
        let mut bytes = codec::from_transport(&sealed.text).unwrap();
        bytes[0] ^= 0xff;
        let tampered = codec::to_transport(&bytes);

        assert!(matches!(
            decrypt_direct(&tampered, &sealed.envelope, &recipient, false),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn tampered_iv_fails_to_decrypt() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();

        let mut sealed = encrypt_direct("attack at dawn", recipient.public(), &sender).unwrap();
        let mut iv = codec::from_transport(sealed.envelope.iv.as_deref().unwrap()).unwrap();
        iv[0] ^= 0x01;
        sealed.envelope.iv = Some(codec::to_transport(&iv));

        assert!(decrypt_direct(&sealed.text, &sealed.envelope, &recipient, false).is_err());
    }

    #[test]
    fn wrong_viewer_key_fails() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();
        let intruder = KeyPair::generate().unwrap();

        let sealed = encrypt_direct("secret", recipient.public(), &sender).unwrap();
        assert!(decrypt_direct(&sealed.text, &sealed.envelope, &intruder, false).is_err());
    }

    #[test]
    fn each_message_gets_a_fresh_key_and_iv() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();

        let a = encrypt_direct("same text", recipient.public(), &sender).unwrap();
        let b = encrypt_direct("same text", recipient.public(), &sender).unwrap();
        assert_ne!(a.text, b.text);
        assert_ne!(a.envelope.iv, b.envelope.iv);
        assert_ne!(a.envelope.encrypted_key, b.envelope.encrypted_key);
        // Identical plaintext still hashes identically
        assert_eq!(a.envelope.signature, b.envelope.signature);
    }
}
