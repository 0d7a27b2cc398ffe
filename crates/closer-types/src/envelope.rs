use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One reader's copy of a message's one-time symmetric key, sealed under
/// that reader's public key. Group envelopes carry one entry per member
/// whose public key was discoverable at send time, in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    pub recipient_id: Uuid,
    pub encrypted_key: String,
}

/// Encryption fields of a direct message. All binary values are
/// base64 transport-encoded; `signature` is the hex SHA-256 of the
/// plaintext. Two named key slots: recipient and sender self-copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectEnvelope {
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_encrypted_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_public_key: Option<String>,
}

/// Encryption fields of a group message: a single shared ciphertext plus
/// the per-member key fanout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEnvelope {
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypted_keys: Vec<WrappedKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_public_key: Option<String>,
}

impl GroupEnvelope {
    /// The fanout entry addressed to `viewer`, if the sender wrapped a key
    /// for them.
    pub fn key_for(&self, viewer: Uuid) -> Option<&WrappedKey> {
        self.encrypted_keys.iter().find(|k| k.recipient_id == viewer)
    }
}

/// Output of the direct cipher: ciphertext in transport form plus the
/// envelope fields that must travel with it.
#[derive(Debug, Clone)]
pub struct SealedDirect {
    pub text: String,
    pub envelope: DirectEnvelope,
}

/// Output of the group cipher. When no key could be wrapped for anyone the
/// cipher degrades: `text` is the original plaintext and the envelope is
/// empty with `is_encrypted = false`.
#[derive(Debug, Clone)]
pub struct SealedGroup {
    pub text: String,
    pub envelope: GroupEnvelope,
}
