use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};
use uuid::Uuid;

use closer_db::models::{GroupMessageRow, GroupRow};
use closer_types::api::{
    AddMembersRequest, Claims, CreateGroupRequest, SendGroupMessageRequest, UpdateGroupRequest,
    UpdateRoleRequest,
};
use closer_types::events::ChatEvent;
use closer_types::models::{Group, Role, SystemAction};

use crate::auth::AppState;
use crate::wire;

fn load_group(state: &AppState, group_id: Uuid) -> Result<Group, StatusCode> {
    let gid = group_id.to_string();
    let row = state
        .db
        .get_group(&gid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let members = state
        .db
        .get_group_members(&gid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(wire::group(row, members))
}

/// The caller's role, or FORBIDDEN if they're not in the group.
fn require_member(state: &AppState, group_id: Uuid, user_id: Uuid) -> Result<Role, StatusCode> {
    state
        .db
        .member_role(&group_id.to_string(), &user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(|raw| wire::role_from_str(&raw))
        .ok_or(StatusCode::FORBIDDEN)
}

fn full_name_of(state: &AppState, user_id: Uuid) -> Result<String, StatusCode> {
    Ok(state
        .db
        .get_user_by_id(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(|u| u.full_name)
        .unwrap_or_else(|| "Unknown".to_string()))
}

/// Persist a membership notice and fan it out to the group room. System
/// messages have no sender and are never encrypted.
fn post_system_message(
    state: &AppState,
    group_id: Uuid,
    action: SystemAction,
    text: String,
) -> Result<(), StatusCode> {
    let row = GroupMessageRow {
        id: Uuid::new_v4().to_string(),
        group_id: group_id.to_string(),
        sender_id: None,
        sender_name: None,
        sender_avatar: None,
        text: Some(text),
        image: None,
        kind: "system".to_string(),
        system_action: Some(wire::system_action_to_str(action).to_string()),
        is_encrypted: false,
        encrypted_keys: None,
        iv: None,
        signature: None,
        sender_public_key: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    state
        .db
        .insert_group_message(&row)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .db
        .touch_group(&group_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state.dispatcher.broadcast(ChatEvent::NewGroupMessage {
        group_id,
        message: wire::group_message(row),
    });
    Ok(())
}

// -- Group CRUD --

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.trim().is_empty() || req.name.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let group_id = Uuid::new_v4();
    let now = chrono::Utc::now().to_rfc3339();

    state
        .db
        .create_group(&GroupRow {
            id: group_id.to_string(),
            name: req.name,
            description: req.description,
            avatar: None,
            created_by: claims.sub.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .db
        .add_member(&group_id.to_string(), &claims.sub.to_string(), "creator")
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    for member_id in &req.member_ids {
        if *member_id == claims.sub {
            continue;
        }
        state
            .db
            .add_member(&group_id.to_string(), &member_id.to_string(), "member")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    }

    let group = load_group(&state, group_id)?;
    info!(
        "{} ({}) created group '{}' with {} members",
        claims.full_name,
        claims.sub,
        group.name,
        group.members.len()
    );

    // Every member's live connection joins the room, then gets told about
    // the new group directly
    for member_id in group.member_ids() {
        state.dispatcher.join_room(member_id, group_id).await;
        state
            .dispatcher
            .send_to_user(member_id, ChatEvent::GroupCreated {
                group: group.clone(),
            })
            .await;
    }

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn get_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let me = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db.db.groups_for_user(&me))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut groups = Vec::with_capacity(rows.len());
    for row in rows {
        let members = state
            .db
            .get_group_members(&row.id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        groups.push(wire::group(row, members));
    }

    Ok(Json(groups))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_member(&state, group_id, claims.sub)?;
    Ok(Json(load_group(&state, group_id)?))
}

pub async fn update_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let role = require_member(&state, group_id, claims.sub)?;
    if !role.can_moderate() {
        return Err(StatusCode::FORBIDDEN);
    }
    if let Some(name) = &req.name {
        if name.trim().is_empty() || name.len() > 64 {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    state
        .db
        .update_group(
            &group_id.to_string(),
            req.name.as_deref(),
            req.description.as_deref(),
            req.avatar.as_deref(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let group = load_group(&state, group_id)?;
    state.dispatcher.broadcast(ChatEvent::GroupUpdated {
        group: group.clone(),
    });
    Ok(Json(group))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let role = require_member(&state, group_id, claims.sub)?;
    if role != Role::Creator {
        return Err(StatusCode::FORBIDDEN);
    }

    // Fan out before the room membership is torn down client-side
    state
        .dispatcher
        .broadcast(ChatEvent::GroupDeleted { group_id });

    state
        .db
        .delete_group(&group_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("{} ({}) deleted group {}", claims.full_name, claims.sub, group_id);
    Ok(StatusCode::NO_CONTENT)
}

// -- Membership --

pub async fn add_members(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMembersRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let role = require_member(&state, group_id, claims.sub)?;
    if !role.can_moderate() {
        return Err(StatusCode::FORBIDDEN);
    }
    if req.member_ids.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let before = load_group(&state, group_id)?;
    let mut added_names = Vec::new();
    let mut added_ids = Vec::new();
    for member_id in &req.member_ids {
        if before.role_of(*member_id).is_some() {
            continue; // already in the group
        }
        state
            .db
            .add_member(&group_id.to_string(), &member_id.to_string(), "member")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        added_names.push(full_name_of(&state, *member_id)?);
        added_ids.push(*member_id);
    }

    if added_ids.is_empty() {
        return Ok(Json(before));
    }

    // New members join the room first so the membership notice reaches them
    for member_id in &added_ids {
        state.dispatcher.join_room(*member_id, group_id).await;
    }

    post_system_message(
        &state,
        group_id,
        SystemAction::MemberAdded,
        format!("{} added {}", claims.full_name, added_names.join(", ")),
    )?;

    let group = load_group(&state, group_id)?;
    state.dispatcher.broadcast(ChatEvent::MembersAdded {
        group_id,
        group: group.clone(),
    });
    // Direct notice for new members whose clients don't know the group yet
    for member_id in &added_ids {
        state
            .dispatcher
            .send_to_user(*member_id, ChatEvent::GroupCreated {
                group: group.clone(),
            })
            .await;
    }

    Ok(Json(group))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let actor = require_member(&state, group_id, claims.sub)?;
    if !actor.can_moderate() {
        return Err(StatusCode::FORBIDDEN);
    }
    let target = require_member(&state, group_id, user_id).map_err(|_| StatusCode::NOT_FOUND)?;
    // The creator can't be removed; admins are only removable by the creator
    if target == Role::Creator || (target == Role::Admin && actor != Role::Creator) {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .remove_member(&group_id.to_string(), &user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let removed_name = full_name_of(&state, user_id)?;
    post_system_message(
        &state,
        group_id,
        SystemAction::MemberRemoved,
        format!("{} removed {}", claims.full_name, removed_name),
    )?;

    let group = load_group(&state, group_id)?;
    let event = ChatEvent::MemberRemoved {
        group_id,
        user_id,
        group: group.clone(),
    };
    // Tell the removed user directly, then drop them from the room before
    // the remaining members get the update
    state.dispatcher.send_to_user(user_id, event.clone()).await;
    state.dispatcher.leave_room(user_id, group_id).await;
    state.dispatcher.broadcast(event);

    Ok(Json(group))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let role = require_member(&state, group_id, claims.sub)?;
    if role == Role::Creator {
        // Creators delete the group instead of abandoning it
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .remove_member(&group_id.to_string(), &claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    post_system_message(
        &state,
        group_id,
        SystemAction::MemberLeft,
        format!("{} left the group", claims.full_name),
    )?;

    let group = load_group(&state, group_id)?;
    state.dispatcher.leave_room(claims.sub, group_id).await;
    state.dispatcher.broadcast(ChatEvent::MemberLeft {
        group_id,
        user_id: claims.sub,
        group,
    });

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_role(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let actor = require_member(&state, group_id, claims.sub)?;
    if actor != Role::Creator {
        return Err(StatusCode::FORBIDDEN);
    }
    let target = require_member(&state, group_id, user_id).map_err(|_| StatusCode::NOT_FOUND)?;
    if target == Role::Creator || req.role == Role::Creator {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .db
        .update_member_role(
            &group_id.to_string(),
            &user_id.to_string(),
            wire::role_to_str(req.role),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let target_name = full_name_of(&state, user_id)?;
    let (action, text) = if req.role == Role::Admin {
        (
            SystemAction::MemberPromoted,
            format!("{} promoted {} to admin", claims.full_name, target_name),
        )
    } else {
        (
            SystemAction::MemberDemoted,
            format!("{} demoted {} to member", claims.full_name, target_name),
        )
    };
    post_system_message(&state, group_id, action, text)?;

    let group = load_group(&state, group_id)?;
    state.dispatcher.broadcast(ChatEvent::MemberRoleUpdated {
        group_id,
        user_id,
        new_role: req.role,
        group: group.clone(),
    });

    Ok(Json(group))
}

// -- Group messages --

pub async fn get_group_messages(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_member(&state, group_id, claims.sub)?;

    let db = state.clone();
    let gid = group_id.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.get_group_messages(&gid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<_> = rows.into_iter().map(wire::group_message).collect();
    Ok(Json(messages))
}

pub async fn send_group_message(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendGroupMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_member(&state, group_id, claims.sub)?;

    if req.text.as_deref().unwrap_or("").is_empty() && req.image.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.envelope.is_encrypted && (req.envelope.encrypted_keys.is_empty() || req.envelope.iv.is_none())
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    let sender = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encrypted_keys = if req.envelope.encrypted_keys.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&req.envelope.encrypted_keys)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        )
    };

    let row = GroupMessageRow {
        id: Uuid::new_v4().to_string(),
        group_id: group_id.to_string(),
        sender_id: Some(claims.sub.to_string()),
        sender_name: Some(sender.full_name),
        sender_avatar: sender.avatar,
        text: req.text,
        image: req.image,
        kind: "message".to_string(),
        system_action: None,
        is_encrypted: req.envelope.is_encrypted,
        encrypted_keys,
        iv: req.envelope.iv,
        signature: req.envelope.signature,
        sender_public_key: req.envelope.sender_public_key,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let db = state.clone();
    let insert_row = row.clone();
    tokio::task::spawn_blocking(move || {
        db.db.insert_group_message(&insert_row)?;
        db.db.touch_group(&insert_row.group_id)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let message = wire::group_message(row);
    state.dispatcher.broadcast(ChatEvent::NewGroupMessage {
        group_id,
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}

/// Hard delete. The sender may delete their own message; moderators may
/// delete anything except system notices.
pub async fn delete_group_message(
    State(state): State<AppState>,
    Path((group_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let role = require_member(&state, group_id, claims.sub)?;

    let row = state
        .db
        .get_group_message(&message_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if row.group_id != group_id.to_string() {
        return Err(StatusCode::NOT_FOUND);
    }
    if row.kind == "system" {
        return Err(StatusCode::FORBIDDEN);
    }

    let is_sender = row.sender_id.as_deref() == Some(claims.sub.to_string().as_str());
    if !is_sender && !role.can_moderate() {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .delete_group_message(&message_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state.dispatcher.broadcast(ChatEvent::GroupMessageDeleted {
        group_id,
        message_id,
    });

    Ok(StatusCode::NO_CONTENT)
}
