use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_store::Store;
use parley_types::events::GatewayEvent;
use parley_types::models::PresenceStatus;

use crate::registry::ConnectionRegistry;
use crate::router::RoomRouter;

/// Per-user presence state machine: offline → online on the first live
/// connection, online → offline on the last one. Consults the registry's
/// connection count rather than assuming one connection per user.
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    router: RoomRouter,
    store: Arc<dyn Store>,
}

impl PresenceTracker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: RoomRouter,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            registry,
            router,
            store,
        }
    }

    /// Call after a connection registers. Broadcasts the online transition
    /// exactly once, on the user's first connection.
    pub async fn on_connect(&self, user_id: Uuid) {
        if self.registry.connection_count(user_id).await != 1 {
            return;
        }
        if let Err(e) = self
            .store
            .update_user_status(user_id, PresenceStatus::Online, None)
            .await
        {
            // Presence is transient and derivable from the registry, so the
            // broadcast still goes out.
            warn!(%user_id, error = %e, "failed to persist online status");
        }
        debug!(%user_id, "user online");
        self.router
            .broadcast(GatewayEvent::UserStatusChange {
                user_id,
                status: PresenceStatus::Online,
            })
            .await;
    }

    /// Call after a connection unregisters. Broadcasts the offline
    /// transition exactly once, when the user's last connection is gone,
    /// and stamps `last_seen` on that transition only.
    pub async fn on_disconnect(&self, user_id: Uuid) {
        if self.registry.connection_count(user_id).await != 0 {
            return;
        }
        if let Err(e) = self
            .store
            .update_user_status(user_id, PresenceStatus::Offline, Some(Utc::now()))
            .await
        {
            warn!(%user_id, error = %e, "failed to persist offline status");
        }
        debug!(%user_id, "user offline");
        self.router
            .broadcast(GatewayEvent::UserStatusChange {
                user_id,
                status: PresenceStatus::Offline,
            })
            .await;
    }

    /// Users currently holding at least one live connection, for replay to
    /// a freshly connected client.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.registry.online_users().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_store::SqliteStore;
    use parley_types::models::User;
    use tokio::sync::mpsc;

    async fn seeded_store() -> (Arc<dyn Store>, Uuid) {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            avatar: None,
            status: PresenceStatus::Offline,
            last_seen: None,
            blocked_users: vec![],
            created_at: Utc::now(),
        };
        store.create_user(&user, "hash").await.unwrap();
        (Arc::new(store), user.id)
    }

    fn status_changes(
        rx: &mut mpsc::UnboundedReceiver<GatewayEvent>,
        target: Uuid,
    ) -> Vec<PresenceStatus> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let GatewayEvent::UserStatusChange { user_id, status } = event {
                if user_id == target {
                    seen.push(status);
                }
            }
        }
        seen
    }

    #[tokio::test]
    async fn one_broadcast_per_transition_across_n_connections() {
        let (store, user) = seeded_store().await;
        let registry = Arc::new(ConnectionRegistry::new());
        let router = RoomRouter::new(registry.clone());
        let presence = PresenceTracker::new(registry.clone(), router, store.clone());

        // An observer from another account watches the broadcasts.
        let observer = Uuid::new_v4();
        let observer_conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(observer_conn, observer, tx).await;
        presence.on_connect(observer).await;
        let _ = status_changes(&mut rx, observer); // drain the observer's own transition

        let conns: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for conn in &conns {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.register(*conn, user, tx).await;
            presence.on_connect(user).await;
        }
        assert_eq!(
            status_changes(&mut rx, user),
            vec![PresenceStatus::Online],
            "three connections must produce a single online broadcast"
        );

        for conn in &conns {
            registry.unregister(*conn).await;
            presence.on_disconnect(user).await;
        }
        assert_eq!(
            status_changes(&mut rx, user),
            vec![PresenceStatus::Offline],
            "three disconnects must produce a single offline broadcast"
        );

        let stored = store.find_user_by_id(user).await.unwrap().unwrap();
        assert_eq!(stored.status, PresenceStatus::Offline);
        assert!(stored.last_seen.is_some(), "last_seen set on the offline edge");
    }

    #[tokio::test]
    async fn online_status_is_persisted() {
        let (store, user) = seeded_store().await;
        let registry = Arc::new(ConnectionRegistry::new());
        let router = RoomRouter::new(registry.clone());
        let presence = PresenceTracker::new(registry.clone(), router, store.clone());

        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(conn, user, tx).await;
        presence.on_connect(user).await;

        let stored = store.find_user_by_id(user).await.unwrap().unwrap();
        assert_eq!(stored.status, PresenceStatus::Online);
        assert!(stored.last_seen.is_none());
        assert_eq!(presence.online_users().await, vec![user]);
    }
}
