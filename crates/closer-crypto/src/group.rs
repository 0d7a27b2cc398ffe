//! Group-message cipher: one ciphertext, N wrapped keys.
//!
//! The body is encrypted exactly once; only the one-time message key is
//! wrapped per member, so fanout cost is O(N) small asymmetric seals
//! regardless of message size. Members whose public key is not
//! discoverable at send time are silently skipped — they will render a
//! "no key" placeholder rather than blocking everyone else's delivery.

use tracing::{debug, warn};
use uuid::Uuid;

use closer_types::envelope::{GroupEnvelope, SealedGroup, WrappedKey};

use crate::codec;
use crate::direct::{fresh_iv, fresh_message_key, symmetric_decrypt, symmetric_encrypt};
use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};
use crate::wrap;

/// Membership snapshot entry taken at send time. `public_key` is `None`
/// when the directory lookup found nothing for this member.
#[derive(Debug, Clone)]
pub struct GroupRecipient {
    pub user_id: Uuid,
    pub public_key: Option<PublicKey>,
}

/// Encrypt a message for a group membership snapshot.
///
/// Degrades to an unencrypted send (plaintext text, empty envelope) when
/// not a single member key could be wrapped.
pub fn encrypt_group(
    plaintext: &str,
    recipients: &[GroupRecipient],
    sender: &KeyPair,
) -> Result<SealedGroup, CryptoError> {
    let message_key = fresh_message_key();
    let iv = fresh_iv();

    let mut encrypted_keys = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let Some(public_key) = &recipient.public_key else {
            debug!(user_id = %recipient.user_id, "no public key on file, skipping fanout entry");
            continue;
        };
        let wrapped = wrap::wrap_key(&message_key, public_key)?;
        encrypted_keys.push(WrappedKey {
            recipient_id: recipient.user_id,
            encrypted_key: codec::to_transport(&wrapped),
        });
    }

    if encrypted_keys.is_empty() {
        warn!("no wrappable member keys, degrading to unencrypted send");
        return Ok(SealedGroup {
            text: plaintext.to_string(),
            envelope: GroupEnvelope::default(),
        });
    }

    let ciphertext = symmetric_encrypt(&message_key, &iv, plaintext)?;

    Ok(SealedGroup {
        text: codec::to_transport(&ciphertext),
        envelope: GroupEnvelope {
            is_encrypted: true,
            encrypted_keys,
            iv: Some(codec::to_transport(&iv)),
            signature: Some(codec::hash_text(plaintext)),
            sender_public_key: Some(sender.public_b64()),
        },
    })
}

/// Decrypt a group message using the viewer's own fanout entry.
pub fn decrypt_group(
    text: &str,
    envelope: &GroupEnvelope,
    viewer_id: Uuid,
    viewer: &KeyPair,
) -> Result<String, CryptoError> {
    let entry = envelope
        .key_for(viewer_id)
        .ok_or(CryptoError::NoKeyForViewer)?;

    let wrapped = codec::from_transport(&entry.encrypted_key)?;
    let iv = codec::from_transport(envelope.iv.as_deref().ok_or(CryptoError::Decryption)?)?;
    let ciphertext = codec::from_transport(text)?;

    let message_key = wrap::unwrap_key(&wrapped, viewer)?;
    symmetric_decrypt(&message_key, &iv, &ciphertext)
}
