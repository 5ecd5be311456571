pub mod auth;
pub mod connection;
pub mod engine;
pub mod markdown;
pub mod presence;
pub mod registry;
pub mod router;

use std::sync::Arc;

use parley_store::Store;

use crate::auth::AuthVerifier;
use crate::engine::ChatEngine;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::router::RoomRouter;

/// Everything a live connection needs. Cheap to clone; all members share
/// the same underlying state.
#[derive(Clone)]
pub struct Gateway {
    pub registry: Arc<ConnectionRegistry>,
    pub router: RoomRouter,
    pub presence: Arc<PresenceTracker>,
    pub engine: ChatEngine,
    pub verifier: AuthVerifier,
}

impl Gateway {
    pub fn new(store: Arc<dyn Store>, verifier: AuthVerifier) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = RoomRouter::new(registry.clone());
        let presence = Arc::new(PresenceTracker::new(
            registry.clone(),
            router.clone(),
            store.clone(),
        ));
        let engine = ChatEngine::new(store, router.clone());
        Self {
            registry,
            router,
            presence,
            engine,
            verifier,
        }
    }
}
