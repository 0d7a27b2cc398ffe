use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use closer_api::auth::{self, AppState, AppStateInner};
use closer_api::middleware::require_auth;
use closer_api::wire;
use closer_api::{groups, keys, messages};
use closer_gateway::connection;
use closer_gateway::dispatcher::Dispatcher;
use closer_types::api::Claims;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "closer=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("CLOSER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("CLOSER_DB_PATH").unwrap_or_else(|_| "closer.db".into());
    let host = std::env::var("CLOSER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CLOSER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = closer_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
    });

    let state = ServerState {
        app: app_state.clone(),
        dispatcher: dispatcher.clone(),
        jwt_secret: jwt_secret.clone(),
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/keys", post(keys::store_keys))
        .route("/auth/public-key/{user_id}", get(keys::get_public_key))
        .route("/messages/contacts", get(messages::get_contacts))
        .route("/messages/chats", get(messages::get_chats))
        .route("/messages/{partner_id}", get(messages::get_conversation))
        .route("/messages/send/{receiver_id}", post(messages::send_message))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/groups", post(groups::create_group))
        .route("/groups", get(groups::get_groups))
        .route("/groups/{group_id}", get(groups::get_group))
        .route("/groups/{group_id}", put(groups::update_group))
        .route("/groups/{group_id}", delete(groups::delete_group))
        .route("/groups/{group_id}/members", post(groups::add_members))
        .route(
            "/groups/{group_id}/members/{user_id}",
            delete(groups::remove_member),
        )
        .route(
            "/groups/{group_id}/members/{user_id}/role",
            put(groups::update_role),
        )
        .route("/groups/{group_id}/leave", post(groups::leave_group))
        .route("/groups/{group_id}/messages", get(groups::get_group_messages))
        .route("/groups/{group_id}/messages", post(groups::send_group_message))
        .route(
            "/groups/{group_id}/messages/{message_id}",
            delete(groups::delete_group_message),
        )
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Closer server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

/// Authenticate the upgrade via `?token=` (browsers can't set headers on
/// WebSocket requests), then hand the socket to the gateway pre-subscribed
/// to all of the user's group rooms.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let token_data = decode::<Claims>(
        &query.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id = token_data.claims.sub;
    let full_name = token_data.claims.full_name;

    let initial_groups = match state.app.db.group_ids_for_user(&user_id.to_string()) {
        Ok(ids) => ids
            .iter()
            .map(|raw| wire::parse_id(raw, "group_members.group_id"))
            .collect(),
        Err(e) => {
            warn!("Failed to load group rooms for {}: {}", user_id, e);
            Vec::new()
        }
    };

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher,
            user_id,
            full_name,
            initial_groups,
        )
    }))
}
