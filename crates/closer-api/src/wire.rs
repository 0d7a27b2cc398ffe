//! Conversions from SQLite row shapes into the shared wire types.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use closer_db::models::{DirectMessageRow, GroupMemberRow, GroupMessageRow, GroupRow};
use closer_types::envelope::{DirectEnvelope, GroupEnvelope, WrappedKey};
use closer_types::models::{
    DirectMessage, Group, GroupMember, GroupMessage, MessageKind, Role, SenderRef, SystemAction,
    UserSummary,
};

pub fn parse_id(raw: &str, ctx: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}' in {}: {}", raw, ctx, e);
        Uuid::default()
    })
}

pub fn parse_ts(raw: &str, ctx: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' in {}: {}", raw, ctx, e);
            DateTime::default()
        })
}

pub fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Creator => "creator",
        Role::Admin => "admin",
        Role::Member => "member",
    }
}

pub fn role_from_str(raw: &str) -> Role {
    match raw {
        "creator" => Role::Creator,
        "admin" => Role::Admin,
        _ => Role::Member,
    }
}

pub fn system_action_to_str(action: SystemAction) -> &'static str {
    match action {
        SystemAction::MemberAdded => "member_added",
        SystemAction::MemberRemoved => "member_removed",
        SystemAction::MemberLeft => "member_left",
        SystemAction::MemberPromoted => "member_promoted",
        SystemAction::MemberDemoted => "member_demoted",
    }
}

pub fn system_action_from_str(raw: &str) -> Option<SystemAction> {
    match raw {
        "member_added" => Some(SystemAction::MemberAdded),
        "member_removed" => Some(SystemAction::MemberRemoved),
        "member_left" => Some(SystemAction::MemberLeft),
        "member_promoted" => Some(SystemAction::MemberPromoted),
        "member_demoted" => Some(SystemAction::MemberDemoted),
        _ => None,
    }
}

pub fn direct_message(row: DirectMessageRow) -> DirectMessage {
    DirectMessage {
        id: parse_id(&row.id, "direct_messages"),
        sender_id: SenderRef::Id(parse_id(&row.sender_id, "direct_messages.sender_id")),
        receiver_id: parse_id(&row.receiver_id, "direct_messages.receiver_id"),
        text: row.text,
        image: row.image,
        envelope: DirectEnvelope {
            is_encrypted: row.is_encrypted,
            encrypted_key: row.encrypted_key,
            sender_encrypted_key: row.sender_encrypted_key,
            iv: row.iv,
            signature: row.signature,
            sender_public_key: row.sender_public_key,
        },
        created_at: parse_ts(&row.created_at, "direct_messages"),
    }
}

pub fn group_message(row: GroupMessageRow) -> GroupMessage {
    let sender_id = row.sender_id.as_deref().map(|raw| {
        let id = parse_id(raw, "group_messages.sender_id");
        match &row.sender_name {
            // History is returned with the sender expanded
            Some(full_name) => SenderRef::Expanded(UserSummary {
                id,
                full_name: full_name.clone(),
                avatar: row.sender_avatar.clone(),
            }),
            None => SenderRef::Id(id),
        }
    });

    let encrypted_keys: Vec<WrappedKey> = match &row.encrypted_keys {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!("Corrupt encrypted_keys on message '{}': {}", row.id, e);
            Vec::new()
        }),
        None => Vec::new(),
    };

    GroupMessage {
        id: parse_id(&row.id, "group_messages"),
        group_id: parse_id(&row.group_id, "group_messages.group_id"),
        sender_id,
        text: row.text,
        image: row.image,
        kind: if row.kind == "system" {
            MessageKind::System
        } else {
            MessageKind::Message
        },
        system_action: row.system_action.as_deref().and_then(system_action_from_str),
        envelope: GroupEnvelope {
            is_encrypted: row.is_encrypted,
            encrypted_keys,
            iv: row.iv,
            signature: row.signature,
            sender_public_key: row.sender_public_key,
        },
        created_at: parse_ts(&row.created_at, "group_messages"),
    }
}

pub fn group(row: GroupRow, member_rows: Vec<GroupMemberRow>) -> Group {
    let members = member_rows
        .into_iter()
        .map(|m| GroupMember {
            user: SenderRef::Expanded(UserSummary {
                id: parse_id(&m.user_id, "group_members.user_id"),
                full_name: m.full_name,
                avatar: m.avatar,
            }),
            role: role_from_str(&m.role),
        })
        .collect();

    Group {
        id: parse_id(&row.id, "groups"),
        name: row.name,
        description: row.description,
        avatar: row.avatar,
        created_by: parse_id(&row.created_by, "groups.created_by"),
        members,
        created_at: parse_ts(&row.created_at, "groups"),
        updated_at: parse_ts(&row.updated_at, "groups"),
    }
}
