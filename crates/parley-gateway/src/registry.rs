use std::collections::{HashMap, HashSet};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::{GatewayEvent, RoomId};

pub type EventSender = mpsc::UnboundedSender<GatewayEvent>;

struct ConnectionEntry {
    user_id: Uuid,
    sender: EventSender,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<Uuid, ConnectionEntry>,
    by_user: HashMap<Uuid, HashSet<Uuid>>,
}

/// In-memory bookkeeping for live, authenticated connections.
///
/// One lock guards both maps: register/join/unregister are mutually
/// exclusive with the router's fan-out reads, so a connection is never
/// observed half torn down and a just-joined connection is never missed.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Record a live connection. A user may hold any number of
    /// simultaneous connections (multi-device).
    pub async fn register(&self, conn_id: Uuid, user_id: Uuid, sender: EventSender) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        );
        inner.by_user.entry(user_id).or_default().insert(conn_id);
    }

    /// Idempotent. Returns false when the connection is already gone.
    pub async fn join_room(&self, conn_id: Uuid, room: RoomId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.connections.get_mut(&conn_id) {
            Some(entry) => {
                entry.rooms.insert(room);
                true
            }
            None => false,
        }
    }

    /// Remove a connection and all its room memberships. Returns the
    /// associated user id so the caller can decide whether this was the
    /// user's last connection.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<Uuid> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.remove(&conn_id)?;
        if let Some(conns) = inner.by_user.get_mut(&entry.user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                inner.by_user.remove(&entry.user_id);
            }
        }
        Some(entry.user_id)
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .by_user
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    /// Users with at least one live connection.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.read().await.by_user.keys().copied().collect()
    }

    pub(crate) async fn senders_for_room(&self, room: RoomId) -> Vec<(Uuid, EventSender)> {
        self.inner
            .read()
            .await
            .connections
            .values()
            .filter(|entry| entry.rooms.contains(&room))
            .map(|entry| (entry.user_id, entry.sender.clone()))
            .collect()
    }

    pub(crate) async fn senders_for_user(&self, user_id: Uuid) -> Vec<EventSender> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(&user_id)
            .map(|conns| {
                conns
                    .iter()
                    .filter_map(|conn_id| inner.connections.get(conn_id))
                    .map(|entry| entry.sender.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) async fn all_senders(&self) -> Vec<EventSender> {
        self.inner
            .read()
            .await
            .connections
            .values()
            .map(|entry| entry.sender.clone())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> EventSender {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn multi_device_registration() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());

        registry.register(c1, user, sender()).await;
        registry.register(c2, user, sender()).await;
        assert_eq!(registry.connection_count(user).await, 2);

        assert_eq!(registry.unregister(c1).await, Some(user));
        assert_eq!(registry.connection_count(user).await, 1);

        assert_eq!(registry.unregister(c2).await, Some(user));
        assert_eq!(registry.connection_count(user).await, 0);
        assert!(registry.online_users().await.is_empty());

        // Unregistering a gone connection is a no-op.
        assert_eq!(registry.unregister(c2).await, None);
    }

    #[tokio::test]
    async fn join_room_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let room = RoomId::User(user);

        registry.register(conn, user, sender()).await;
        assert!(registry.join_room(conn, room).await);
        assert!(registry.join_room(conn, room).await);
        assert_eq!(registry.senders_for_room(room).await.len(), 1);

        // Joining from a dead connection does nothing.
        assert!(!registry.join_room(Uuid::new_v4(), room).await);
    }

    #[tokio::test]
    async fn unregister_drops_room_memberships() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let room = RoomId::Group(Uuid::new_v4());

        registry.register(conn, user, sender()).await;
        registry.join_room(conn, room).await;
        registry.unregister(conn).await;

        assert!(registry.senders_for_room(room).await.is_empty());
    }
}
