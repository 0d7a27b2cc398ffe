use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use closer_types::events::ChatEvent;

/// Manages all connected clients, presence, and group rooms.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for chat events — every connection receives every
    /// event and filters room-scoped ones against its user's memberships
    broadcast_tx: broadcast::Sender<ChatEvent>,

    /// Users with a live connection
    online_users: RwLock<HashSet<Uuid>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<ChatEvent>)>>,

    /// Group room memberships: user_id -> group ids the connection listens to
    rooms: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashSet::new()),
                user_channels: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to chat events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connections. Room-scoped events are dropped
    /// per-connection for users outside the event's group.
    pub fn broadcast(&self, event: ChatEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<ChatEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Send a targeted event to a specific user, if connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: ChatEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Replace a user's room set wholesale (used on connect).
    pub async fn set_rooms(&self, user_id: Uuid, group_ids: Vec<Uuid>) {
        self.inner
            .rooms
            .write()
            .await
            .insert(user_id, group_ids.into_iter().collect());
    }

    pub async fn join_room(&self, user_id: Uuid, group_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(group_id);
    }

    pub async fn leave_room(&self, user_id: Uuid, group_id: Uuid) {
        if let Some(set) = self.inner.rooms.write().await.get_mut(&user_id) {
            set.remove(&group_id);
        }
    }

    pub async fn in_room(&self, user_id: Uuid, group_id: Uuid) -> bool {
        self.inner
            .rooms
            .read()
            .await
            .get(&user_id)
            .is_some_and(|set| set.contains(&group_id))
    }

    /// Mark a user online and broadcast the fresh presence snapshot.
    pub async fn user_online(&self, user_id: Uuid) {
        let snapshot = {
            let mut online = self.inner.online_users.write().await;
            online.insert(user_id);
            online.iter().copied().collect()
        };
        self.broadcast(ChatEvent::OnlineUsers { user_ids: snapshot });
    }

    /// Mark a user offline. Only cleans up if conn_id still owns the channel,
    /// so a quick reconnect is not clobbered by the old connection's teardown.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        {
            let mut channels = self.inner.user_channels.write().await;
            match channels.get(&user_id) {
                Some((stored, _)) if *stored == conn_id => {
                    channels.remove(&user_id);
                }
                // A newer connection has taken over — don't touch anything
                _ => return,
            }
        }

        self.inner.rooms.write().await.remove(&user_id);

        let snapshot = {
            let mut online = self.inner.online_users.write().await;
            online.remove(&user_id);
            online.iter().copied().collect()
        };
        self.broadcast(ChatEvent::OnlineUsers { user_ids: snapshot });
    }

    /// Current presence snapshot.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online_users.read().await.iter().copied().collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_new_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, _rx_old) = dispatcher.register_user_channel(user).await;
        dispatcher.user_online(user).await;

        // User reconnects before the old connection finishes tearing down
        let (_new_conn, mut rx_new) = dispatcher.register_user_channel(user).await;

        dispatcher.user_offline(user, old_conn).await;
        assert_eq!(dispatcher.online_users().await, vec![user]);

        // The new connection can still receive targeted events
        dispatcher
            .send_to_user(user, ChatEvent::OnlineUsers { user_ids: vec![] })
            .await;
        assert!(rx_new.try_recv().is_ok());
    }

    #[tokio::test]
    async fn room_membership_tracks_join_and_leave() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let group_a = Uuid::new_v4();
        let group_b = Uuid::new_v4();

        dispatcher.set_rooms(user, vec![group_a]).await;
        assert!(dispatcher.in_room(user, group_a).await);
        assert!(!dispatcher.in_room(user, group_b).await);

        dispatcher.join_room(user, group_b).await;
        dispatcher.leave_room(user, group_a).await;
        assert!(!dispatcher.in_room(user, group_a).await);
        assert!(dispatcher.in_room(user, group_b).await);
    }

    #[tokio::test]
    async fn presence_snapshot_broadcast_on_offline() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let mut rx = dispatcher.subscribe();

        let (conn, _user_rx) = dispatcher.register_user_channel(user).await;
        dispatcher.user_online(user).await;
        match rx.recv().await.unwrap() {
            ChatEvent::OnlineUsers { user_ids } => assert_eq!(user_ids, vec![user]),
            other => panic!("unexpected event: {other:?}"),
        }

        dispatcher.user_offline(user, conn).await;
        match rx.recv().await.unwrap() {
            ChatEvent::OnlineUsers { user_ids } => assert!(user_ids.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
