use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{DirectEnvelope, GroupEnvelope};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A message's sender field on the wire is sometimes a bare identity and
/// sometimes an expanded user record (group history is returned expanded,
/// direct messages are not). Resolved once at the data-access boundary so
/// cipher and coordinator logic only ever see a normalized shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SenderRef {
    Expanded(UserSummary),
    Id(Uuid),
}

impl SenderRef {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Id(id) => *id,
            Self::Expanded(user) => user.id,
        }
    }

    /// Normalize into a full summary, falling back to a placeholder name
    /// when only the identity is known.
    pub fn into_summary(self) -> UserSummary {
        match self {
            Self::Expanded(user) => user,
            Self::Id(id) => UserSummary {
                id,
                full_name: "Unknown".to_string(),
                avatar: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Creator,
    Admin,
    Member,
}

impl Role {
    /// Creator and admin may moderate (delete any message, manage members).
    pub fn can_moderate(self) -> bool {
        matches!(self, Self::Creator | Self::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub user: SenderRef,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub created_by: Uuid,
    pub members: Vec<GroupMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn member_ids(&self) -> Vec<Uuid> {
        self.members.iter().map(|m| m.user.id()).collect()
    }

    pub fn role_of(&self, user_id: Uuid) -> Option<Role> {
        self.members
            .iter()
            .find(|m| m.user.id() == user_id)
            .map(|m| m.role)
    }
}

/// Regular chat message vs. server-generated membership notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Message,
    System,
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAction {
    MemberAdded,
    MemberRemoved,
    MemberLeft,
    MemberPromoted,
    MemberDemoted,
}

/// A stored direct message. `text` holds the symmetric ciphertext in
/// transport form when `envelope.is_encrypted`, plaintext otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: Uuid,
    pub sender_id: SenderRef,
    pub receiver_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub envelope: DirectEnvelope,
    pub created_at: DateTime<Utc>,
}

/// A stored group message. System messages carry no sender and are never
/// encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub id: Uuid,
    pub group_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<SenderRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_action: Option<SystemAction>,
    #[serde(flatten)]
    pub envelope: GroupEnvelope,
    pub created_at: DateTime<Utc>,
}

impl GroupMessage {
    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }

    pub fn sender_uuid(&self) -> Option<Uuid> {
        self.sender_id.as_ref().map(SenderRef::id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_ref_deserializes_both_shapes() {
        let id = Uuid::new_v4();
        let bare: SenderRef = serde_json::from_value(serde_json::json!(id)).unwrap();
        assert_eq!(bare.id(), id);

        let expanded: SenderRef = serde_json::from_value(serde_json::json!({
            "id": id,
            "fullName": "Ada Lovelace",
        }))
        .unwrap();
        assert_eq!(expanded.id(), id);
        assert_eq!(expanded.into_summary().full_name, "Ada Lovelace");
    }

    #[test]
    fn envelope_fields_flatten_with_wire_names() {
        let msg = DirectMessage {
            id: Uuid::new_v4(),
            sender_id: SenderRef::Id(Uuid::new_v4()),
            receiver_id: Uuid::new_v4(),
            text: Some("b64".into()),
            image: None,
            envelope: DirectEnvelope {
                is_encrypted: true,
                encrypted_key: Some("rk".into()),
                sender_encrypted_key: Some("sk".into()),
                iv: Some("iv".into()),
                signature: Some("sig".into()),
                sender_public_key: None,
            },
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["isEncrypted"], true);
        assert_eq!(json["encryptedKey"], "rk");
        assert_eq!(json["senderEncryptedKey"], "sk");
        assert_eq!(json["iv"], "iv");
        assert_eq!(json["signature"], "sig");
    }
}
