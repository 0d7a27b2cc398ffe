use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use closer_crypto::PublicKey;
use closer_types::api::{Claims, PublicKeyResponse, StoreKeysRequest};

use crate::auth::AppState;

/// Enroll the caller for encryption: publish the public key and escrow the
/// private half for recovery on a new device.
pub async fn store_keys(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StoreKeysRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Reject keys that no sender could ever wrap to
    PublicKey::from_b64(&req.public_key).map_err(|_| StatusCode::BAD_REQUEST)?;

    state
        .db
        .store_keys(
            &claims.sub.to_string(),
            &req.public_key,
            req.private_key.as_deref(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("{} ({}) enrolled encryption keys", claims.full_name, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

/// Look up another user's published public key. Returns `publicKey: null`
/// for users who never enrolled, which senders treat as "send plaintext".
pub async fn get_public_key(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state
        .db
        .get_user_by_id(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(PublicKeyResponse {
        user_id,
        full_name: user.full_name,
        public_key: user.public_key,
    }))
}
