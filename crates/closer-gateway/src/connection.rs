use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use closer_types::events::{ChatEvent, ClientCommand};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The JWT was already
/// validated at the HTTP upgrade layer, so we go straight to the event loop.
/// `initial_groups` are the caller's group memberships at connect time; the
/// connection starts subscribed to all of their rooms.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    user_id: Uuid,
    full_name: String,
    initial_groups: Vec<Uuid>,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", full_name, user_id);

    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;
    dispatcher.set_rooms(user_id, initial_groups).await;

    // Send the current presence snapshot to this client before going online,
    // then broadcast the updated snapshot to everyone (ourselves included).
    let snapshot = ChatEvent::OnlineUsers {
        user_ids: dispatcher.online_users().await,
    };
    if let Ok(text) = serde_json::to_string(&snapshot) {
        if sender.send(Message::Text(text.into())).await.is_err() {
            dispatcher.user_offline(user_id, conn_id).await;
            return;
        }
    }
    dispatcher.user_online(user_id).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_send = dispatcher.clone();
    let dispatcher_recv = dispatcher.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    // Room-scoped events only go to members of that group
                    if let Some(group_id) = event.group_id() {
                        if !dispatcher_send.in_room(user_id, group_id).await {
                            continue;
                        }
                    }

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let full_name_recv = full_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, user_id, &full_name_recv, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            full_name_recv,
                            user_id,
                            e,
                            log_excerpt(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", full_name, user_id);
}

/// First ~200 bytes of an unparseable frame, cut on a char boundary so a
/// multi-byte character straddling the limit can't panic the slice.
fn log_excerpt(text: &str) -> &str {
    const MAX: usize = 200;
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn handle_command(
    dispatcher: &Dispatcher,
    user_id: Uuid,
    full_name: &str,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::JoinGroup { group_id } => {
            info!("{} ({}) joining group room {}", full_name, user_id, group_id);
            dispatcher.join_room(user_id, group_id).await;
        }
        ClientCommand::LeaveGroup { group_id } => {
            info!("{} ({}) leaving group room {}", full_name, user_id, group_id);
            dispatcher.leave_room(user_id, group_id).await;
        }
    }
}
