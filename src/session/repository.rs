//! Two-way session index.
//!
//! Sessions are reachable by their tunnel-internal IPv4 address (the
//! reverse path) and by their external address:port (the UDP fast
//! path); both lookups resolve the same object. Eviction is explicit:
//! registration replaces a colliding internal address after deleting
//! the old session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::session::Session;

#[derive(Default)]
struct Index {
    by_internal: HashMap<[u8; 4], Arc<Session>>,
    by_external: HashMap<SocketAddr, Arc<Session>>,
}

/// Internally locked store of registered sessions. Every operation is
/// atomic; the delete-then-add sequence on NAT rebind is performed by
/// the one registration task that owns the replacement session.
pub struct SessionRepository {
    index: RwLock<Index>,
}

impl SessionRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self {
            index: RwLock::new(Index::default()),
        }
    }

    /// Register a session under both of its addresses.
    pub async fn add(&self, session: Arc<Session>) {
        let mut index = self.index.write().await;
        index
            .by_internal
            .insert(session.internal_ip().octets(), Arc::clone(&session));
        index.by_external.insert(session.external_addr(), session);
    }

    /// Remove a session from both indexes. Entries are only removed
    /// when they still resolve to this very session, so deleting a
    /// replaced session cannot evict its successor.
    pub async fn delete(&self, session: &Arc<Session>) {
        let mut index = self.index.write().await;
        let internal = session.internal_ip().octets();
        if index
            .by_internal
            .get(&internal)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            index.by_internal.remove(&internal);
        }
        let external = session.external_addr();
        if index
            .by_external
            .get(&external)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            index.by_external.remove(&external);
        }
    }

    /// Resolve by tunnel-internal address.
    pub async fn get_by_internal(&self, ip: Ipv4Addr) -> Option<Arc<Session>> {
        self.index
            .read()
            .await
            .by_internal
            .get(&ip.octets())
            .map(Arc::clone)
    }

    /// Resolve by external address:port.
    pub async fn get_by_external(&self, addr: &SocketAddr) -> Option<Arc<Session>> {
        self.index
            .read()
            .await
            .by_external
            .get(addr)
            .map(Arc::clone)
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.index.read().await.by_external.len()
    }

    /// Whether no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drain every session, zeroizing key material.
    pub async fn clear(&self) {
        let mut index = self.index.write().await;
        for session in index.by_external.values() {
            session.zeroize();
        }
        index.by_external.clear();
        index.by_internal.clear();
    }
}

impl Default for SessionRepository {
    fn default() -> Self {
        Self::new()
    }
}
