use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DirectMessage, Group, GroupMessage, Role};

/// Events fanned out over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// A direct message was persisted; targeted at sender and receiver.
    NewMessage { message: DirectMessage },

    /// A direct message was hard-deleted by its sender.
    MessageDeleted { message_id: Uuid, sender_id: Uuid },

    /// A message was persisted in a group; fanned out to the group room.
    NewGroupMessage { group_id: Uuid, message: GroupMessage },

    /// A group message was hard-deleted (sender, admin, or creator).
    GroupMessageDeleted { group_id: Uuid, message_id: Uuid },

    /// The viewer was added to a newly created group.
    GroupCreated { group: Group },

    /// Group settings changed (name, description, avatar).
    GroupUpdated { group: Group },

    /// The group was deleted by its creator.
    GroupDeleted { group_id: Uuid },

    /// New members joined an existing group.
    MembersAdded { group_id: Uuid, group: Group },

    /// A member was removed; `user_id` is the removed member.
    MemberRemoved {
        group_id: Uuid,
        user_id: Uuid,
        group: Group,
    },

    /// A member left of their own accord.
    MemberLeft {
        group_id: Uuid,
        user_id: Uuid,
        group: Group,
    },

    /// A member was promoted or demoted.
    MemberRoleUpdated {
        group_id: Uuid,
        user_id: Uuid,
        new_role: Role,
        group: Group,
    },

    /// Full presence snapshot, broadcast on every connect and disconnect.
    OnlineUsers { user_ids: Vec<Uuid> },
}

impl ChatEvent {
    /// The group room this event is scoped to. Events returning `None` are
    /// either targeted (direct messages) or global (presence).
    pub fn group_id(&self) -> Option<Uuid> {
        match self {
            Self::NewGroupMessage { group_id, .. }
            | Self::GroupMessageDeleted { group_id, .. }
            | Self::GroupDeleted { group_id }
            | Self::MembersAdded { group_id, .. }
            | Self::MemberRemoved { group_id, .. }
            | Self::MemberLeft { group_id, .. }
            | Self::MemberRoleUpdated { group_id, .. } => Some(*group_id),
            Self::GroupCreated { group } | Self::GroupUpdated { group } => Some(group.id),
            Self::NewMessage { .. } | Self::MessageDeleted { .. } | Self::OnlineUsers { .. } => {
                None
            }
        }
    }
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Subscribe to a group's broadcast room (after being added to it).
    JoinGroup { group_id: Uuid },

    /// Unsubscribe from a group's broadcast room.
    LeaveGroup { group_id: Uuid },
}
