use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use closer_db::models::DirectMessageRow;
use closer_types::api::{Claims, SendDirectMessageRequest};
use closer_types::events::ChatEvent;
use closer_types::models::UserSummary;

use crate::auth::AppState;
use crate::wire;

/// Everyone except the caller — the sidebar's contact list. Public keys are
/// fetched separately and cached client-side.
pub async fn get_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_contacts(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let users: Vec<UserSummary> = rows
        .into_iter()
        .map(|u| UserSummary {
            id: wire::parse_id(&u.id, "users"),
            full_name: u.full_name,
            avatar: u.avatar,
        })
        .collect();

    Ok(Json(users))
}

/// Contacts the caller has an existing conversation with.
pub async fn get_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_chat_partners(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let users: Vec<UserSummary> = rows
        .into_iter()
        .map(|u| UserSummary {
            id: wire::parse_id(&u.id, "users"),
            full_name: u.full_name,
            avatar: u.avatar,
        })
        .collect();

    Ok(Json(users))
}

/// Full conversation with one partner, oldest first. Ciphertext goes out
/// as stored; decryption is the client's business.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(partner_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let me = claims.sub.to_string();
    let partner = partner_id.to_string();

    // Run blocking DB reads off the async runtime
    let rows = tokio::task::spawn_blocking(move || db.db.get_conversation(&me, &partner))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<_> = rows.into_iter().map(wire::direct_message).collect();
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendDirectMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.text.as_deref().unwrap_or("").is_empty() && req.image.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    // An encrypted envelope must carry both key slots and the IV
    if req.envelope.is_encrypted
        && (req.envelope.encrypted_key.is_none()
            || req.envelope.sender_encrypted_key.is_none()
            || req.envelope.iv.is_none())
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .db
        .get_user_by_id(&receiver_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let message_id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let row = DirectMessageRow {
        id: message_id.to_string(),
        sender_id: claims.sub.to_string(),
        receiver_id: receiver_id.to_string(),
        text: req.text,
        image: req.image,
        is_encrypted: req.envelope.is_encrypted,
        encrypted_key: req.envelope.encrypted_key,
        sender_encrypted_key: req.envelope.sender_encrypted_key,
        iv: req.envelope.iv,
        signature: req.envelope.signature,
        sender_public_key: req.envelope.sender_public_key,
        created_at: now.to_rfc3339(),
    };

    let db = state.clone();
    let insert_row = row.clone();
    tokio::task::spawn_blocking(move || db.db.insert_direct_message(&insert_row))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let message = wire::direct_message(row);

    // Targeted delivery to the receiver; the sender reconciles its own copy
    // from this response
    state
        .dispatcher
        .send_to_user(receiver_id, ChatEvent::NewMessage {
            message: message.clone(),
        })
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Hard delete, sender only. Both parties get the deletion event so open
/// conversation views converge.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = state
        .db
        .get_direct_message(&message_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if row.sender_id != claims.sub.to_string() {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .delete_direct_message(&message_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let receiver_id = wire::parse_id(&row.receiver_id, "direct_messages.receiver_id");
    let event = ChatEvent::MessageDeleted {
        message_id,
        sender_id: claims.sub,
    };
    state.dispatcher.send_to_user(receiver_id, event.clone()).await;
    state.dispatcher.send_to_user(claims.sub, event).await;

    Ok(StatusCode::NO_CONTENT)
}
