use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use parley_types::events::{GatewayEvent, RoomId};

use crate::registry::{ConnectionRegistry, EventSender};

/// Fans events out to live connections. Delivery is best-effort and
/// fire-and-forget: a room with zero joined connections simply drops the
/// event at the transport level — the persisted record remains the durable
/// copy, picked up on the next history fetch.
#[derive(Clone)]
pub struct RoomRouter {
    registry: Arc<ConnectionRegistry>,
}

impl RoomRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver to every connection currently joined to the room.
    /// Returns the number of connections reached.
    pub async fn route(&self, room: RoomId, event: GatewayEvent) -> usize {
        let senders = self.registry.senders_for_room(room).await;
        let delivered = deliver(senders.into_iter().map(|(_, tx)| tx), &event);
        trace!(?room, delivered, "routed event");
        delivered
    }

    /// Same as [`route`](Self::route) but skips every connection belonging
    /// to `excluded_user` (typing indicators never echo to the sender).
    pub async fn route_except(
        &self,
        room: RoomId,
        event: GatewayEvent,
        excluded_user: Uuid,
    ) -> usize {
        let senders = self.registry.senders_for_room(room).await;
        deliver(
            senders
                .into_iter()
                .filter(|(user, _)| *user != excluded_user)
                .map(|(_, tx)| tx),
            &event,
        )
    }

    /// Unicast to all of one user's connections, independent of room
    /// membership (read receipts go back to a sender who never joined the
    /// reader's room).
    pub async fn route_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let senders = self.registry.senders_for_user(user_id).await;
        deliver(senders.into_iter(), &event)
    }

    /// Global broadcast to every live connection (presence changes).
    pub async fn broadcast(&self, event: GatewayEvent) -> usize {
        let senders = self.registry.all_senders().await;
        deliver(senders.into_iter(), &event)
    }
}

fn deliver(senders: impl Iterator<Item = EventSender>, event: &GatewayEvent) -> usize {
    let mut delivered = 0;
    for tx in senders {
        // A send failure means the connection is mid-teardown; skip it.
        if tx.send(event.clone()).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn connect(
        registry: &ConnectionRegistry,
        user: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn, user, tx).await;
        (conn, rx)
    }

    fn ping(user: Uuid) -> GatewayEvent {
        GatewayEvent::MessageRead {
            message_id: Uuid::new_v4(),
            reader_id: user,
        }
    }

    #[tokio::test]
    async fn routes_to_joined_connections_only() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = RoomRouter::new(registry.clone());
        let room = RoomId::Group(Uuid::new_v4());

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conn_a, mut rx_a) = connect(&registry, a).await;
        let (_conn_b, mut rx_b) = connect(&registry, b).await;

        registry.join_room(conn_a, room).await;

        assert_eq!(router.route(room, ping(a)).await, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_room_drops_the_event() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = RoomRouter::new(registry);
        assert_eq!(
            router.route(RoomId::User(Uuid::new_v4()), ping(Uuid::new_v4())).await,
            0
        );
    }

    #[tokio::test]
    async fn route_except_skips_every_connection_of_the_excluded_user() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = RoomRouter::new(registry.clone());
        let room = RoomId::Group(Uuid::new_v4());

        let (sender, other) = (Uuid::new_v4(), Uuid::new_v4());
        let (c1, mut rx1) = connect(&registry, sender).await;
        let (c2, mut rx2) = connect(&registry, sender).await; // second device
        let (c3, mut rx3) = connect(&registry, other).await;
        for conn in [c1, c2, c3] {
            registry.join_room(conn, room).await;
        }

        assert_eq!(router.route_except(room, ping(sender), sender).await, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unicast_reaches_all_devices_without_room_join() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = RoomRouter::new(registry.clone());
        let user = Uuid::new_v4();

        let (_c1, mut rx1) = connect(&registry, user).await;
        let (_c2, mut rx2) = connect(&registry, user).await;

        assert_eq!(router.route_to_user(user, ping(user)).await, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
