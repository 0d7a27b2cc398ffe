//! Decrypt-to-view: stored messages become display records, with every
//! cipher failure absorbed into flags and placeholder text.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use closer_crypto::{KeyPair, codec, direct, group};
use closer_types::models::{DirectMessage, GroupMessage, MessageKind, SenderRef, SystemAction};

pub const ENCRYPTED_PLACEHOLDER: &str = "[Encrypted message]";
pub const DECRYPT_FAILED_PLACEHOLDER: &str = "[Unable to decrypt message]";
pub const NO_KEY_PLACEHOLDER: &str = "[Encrypted - no key for you]";

/// One rendered timeline entry.
#[derive(Debug, Clone)]
pub struct ViewMessage {
    pub id: Uuid,
    /// `None` for system notices.
    pub sender: Option<SenderRef>,
    pub text: Option<String>,
    pub image: Option<String>,
    pub kind: MessageKind,
    pub system_action: Option<SystemAction>,
    pub created_at: DateTime<Utc>,
    pub is_optimistic: bool,
    pub decrypted: bool,
    pub decryption_failed: bool,
    pub no_key: bool,
    pub signature_valid: Option<bool>,
}

impl ViewMessage {
    pub fn sender_id(&self) -> Option<Uuid> {
        self.sender.as_ref().map(SenderRef::id)
    }

    /// Placeholder appended before any network I/O. Replaced in place once
    /// the server confirms, removed on failure.
    pub fn optimistic(
        id: Uuid,
        sender_id: Uuid,
        text: Option<String>,
        image: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut view = clean(id, Some(SenderRef::Id(sender_id)), text, image, created_at);
        view.is_optimistic = true;
        view
    }
}

fn clean(
    id: Uuid,
    sender: Option<SenderRef>,
    text: Option<String>,
    image: Option<String>,
    created_at: DateTime<Utc>,
) -> ViewMessage {
    ViewMessage {
        id,
        sender,
        text,
        image,
        kind: MessageKind::Message,
        system_action: None,
        created_at,
        is_optimistic: false,
        decrypted: false,
        decryption_failed: false,
        no_key: false,
        signature_valid: None,
    }
}

/// Render our own direct message right after the server confirms it. We
/// still hold the typed plaintext, so the confirmed record never goes back
/// through the cipher; flags are set as if decryption succeeded, whether or
/// not the envelope ended up encrypted.
pub fn confirmed_direct(msg: &DirectMessage, text: Option<String>) -> ViewMessage {
    let mut view = clean(
        msg.id,
        Some(msg.sender_id.clone()),
        text,
        msg.image.clone(),
        msg.created_at,
    );
    view.decrypted = true;
    view.signature_valid = Some(true);
    view
}

/// Group counterpart of [`confirmed_direct`].
pub fn confirmed_group(msg: &GroupMessage, text: Option<String>) -> ViewMessage {
    let mut view = clean(
        msg.id,
        msg.sender_id.clone(),
        text,
        msg.image.clone(),
        msg.created_at,
    );
    view.kind = msg.kind;
    view.system_action = msg.system_action;
    view.decrypted = true;
    view.signature_valid = Some(true);
    view
}

/// Render a stored direct message for `viewer_id`.
pub fn view_direct(msg: &DirectMessage, viewer_id: Uuid, keys: Option<&KeyPair>) -> ViewMessage {
    let mut view = clean(
        msg.id,
        Some(msg.sender_id.clone()),
        msg.text.clone(),
        msg.image.clone(),
        msg.created_at,
    );

    if !msg.envelope.is_encrypted {
        return view;
    }

    let Some(ciphertext) = msg.text.as_deref() else {
        return view;
    };
    let Some(keys) = keys else {
        view.text = Some(ENCRYPTED_PLACEHOLDER.to_string());
        return view;
    };

    let viewer_is_sender = msg.sender_id.id() == viewer_id;
    match direct::decrypt_direct(ciphertext, &msg.envelope, keys, viewer_is_sender) {
        Ok(plaintext) => {
            view.signature_valid = msg
                .envelope
                .signature
                .as_deref()
                .map(|sig| codec::verify_signature(&plaintext, sig));
            view.text = Some(plaintext);
            view.decrypted = true;
        }
        Err(closer_crypto::CryptoError::NoKeyForViewer) => {
            view.no_key = true;
            view.text = Some(NO_KEY_PLACEHOLDER.to_string());
        }
        Err(_) => {
            view.decryption_failed = true;
            view.text = Some(DECRYPT_FAILED_PLACEHOLDER.to_string());
        }
    }
    view
}

/// Render a stored group message for `viewer_id`. System notices pass
/// through untouched.
pub fn view_group(msg: &GroupMessage, viewer_id: Uuid, keys: Option<&KeyPair>) -> ViewMessage {
    let mut view = clean(
        msg.id,
        msg.sender_id.clone(),
        msg.text.clone(),
        msg.image.clone(),
        msg.created_at,
    );
    view.kind = msg.kind;
    view.system_action = msg.system_action;

    if msg.is_system() || !msg.envelope.is_encrypted {
        return view;
    }

    let Some(ciphertext) = msg.text.as_deref() else {
        return view;
    };
    let Some(keys) = keys else {
        view.text = Some(ENCRYPTED_PLACEHOLDER.to_string());
        return view;
    };

    match group::decrypt_group(ciphertext, &msg.envelope, viewer_id, keys) {
        Ok(plaintext) => {
            view.signature_valid = msg
                .envelope
                .signature
                .as_deref()
                .map(|sig| codec::verify_signature(&plaintext, sig));
            view.text = Some(plaintext);
            view.decrypted = true;
        }
        Err(closer_crypto::CryptoError::NoKeyForViewer) => {
            view.no_key = true;
            view.text = Some(NO_KEY_PLACEHOLDER.to_string());
        }
        Err(_) => {
            view.decryption_failed = true;
            view.text = Some(DECRYPT_FAILED_PLACEHOLDER.to_string());
        }
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use closer_crypto::direct::encrypt_direct;
    use closer_types::envelope::DirectEnvelope;

    fn stored(sender: Uuid, receiver: Uuid, text: &str, envelope: DirectEnvelope) -> DirectMessage {
        DirectMessage {
            id: Uuid::new_v4(),
            sender_id: SenderRef::Id(sender),
            receiver_id: receiver,
            text: Some(text.to_string()),
            image: None,
            envelope,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plaintext_messages_pass_through() {
        let sender = Uuid::new_v4();
        let msg = stored(sender, Uuid::new_v4(), "hi", DirectEnvelope::default());
        let view = view_direct(&msg, sender, None);
        assert_eq!(view.text.as_deref(), Some("hi"));
        assert!(!view.decrypted && !view.decryption_failed && !view.no_key);
    }

    #[test]
    fn receiver_decrypts_and_validates_signature() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let alice_id = Uuid::new_v4();
        let bob_id = Uuid::new_v4();

        let sealed = encrypt_direct("hello", bob.public(), &alice).unwrap();
        let msg = stored(alice_id, bob_id, &sealed.text, sealed.envelope);

        let view = view_direct(&msg, bob_id, Some(&bob));
        assert_eq!(view.text.as_deref(), Some("hello"));
        assert!(view.decrypted);
        assert_eq!(view.signature_valid, Some(true));
    }

    #[test]
    fn missing_local_keys_renders_placeholder() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let bob_id = Uuid::new_v4();

        let sealed = encrypt_direct("hello", bob.public(), &alice).unwrap();
        let msg = stored(Uuid::new_v4(), bob_id, &sealed.text, sealed.envelope);

        let view = view_direct(&msg, bob_id, None);
        assert_eq!(view.text.as_deref(), Some(ENCRYPTED_PLACEHOLDER));
        assert!(!view.decrypted);
    }

    #[test]
    fn wrong_keys_flag_failure_without_panicking() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let mallory = KeyPair::generate().unwrap();
        let bob_id = Uuid::new_v4();

        let sealed = encrypt_direct("hello", bob.public(), &alice).unwrap();
        let msg = stored(Uuid::new_v4(), bob_id, &sealed.text, sealed.envelope);

        let view = view_direct(&msg, bob_id, Some(&mallory));
        assert!(view.decryption_failed);
        assert_eq!(view.text.as_deref(), Some(DECRYPT_FAILED_PLACEHOLDER));
    }

    #[test]
    fn tampered_signature_is_a_flag_not_an_error() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let bob_id = Uuid::new_v4();

        let sealed = encrypt_direct("hello", bob.public(), &alice).unwrap();
        let mut envelope = sealed.envelope;
        envelope.signature = Some(closer_crypto::codec::hash_text("forged"));
        let msg = stored(Uuid::new_v4(), bob_id, &sealed.text, envelope);

        let view = view_direct(&msg, bob_id, Some(&bob));
        assert!(view.decrypted);
        assert_eq!(view.signature_valid, Some(false));
        assert_eq!(view.text.as_deref(), Some("hello"));
    }
}
