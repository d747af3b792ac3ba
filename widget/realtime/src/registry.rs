//! Process-scoped client registry.
//!
//! Realtime clients are keyed by session id and owned by the host
//! application through this registry, with explicit invalidation when a
//! session rotates — never implicit module-level singletons.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

/// Tracks one live client per session id.
pub struct ClientRegistry<C> {
    clients: RwLock<HashMap<String, Arc<C>>>,
}

impl<C> ClientRegistry<C> {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<C>> {
        self.clients.read().await.get(session_id).cloned()
    }

    /// Return the client for a session, constructing it on first use.
    pub async fn get_or_insert_with(
        &self,
        session_id: &str,
        build: impl FnOnce() -> Arc<C>,
    ) -> Arc<C> {
        let mut clients = self.clients.write().await;
        clients
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "Registering realtime client");
                build()
            })
            .clone()
    }

    /// Drop the client for a session (session rotated or closed).
    pub async fn invalidate(&self, session_id: &str) -> Option<Arc<C>> {
        let removed = self.clients.write().await.remove(session_id);
        if removed.is_some() {
            debug!(session_id, "Invalidated realtime client");
        }
        removed
    }

    pub async fn clear(&self) {
        self.clients.write().await.clear();
    }
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClient(u32);

    #[tokio::test]
    async fn test_get_or_insert_reuses_client() {
        let registry = ClientRegistry::new();
        let first = registry
            .get_or_insert_with("s1", || Arc::new(FakeClient(1)))
            .await;
        let second = registry
            .get_or_insert_with("s1", || Arc::new(FakeClient(2)))
            .await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.0, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let registry = ClientRegistry::new();
        registry
            .get_or_insert_with("s1", || Arc::new(FakeClient(1)))
            .await;
        assert!(registry.invalidate("s1").await.is_some());
        assert!(registry.get("s1").await.is_none());

        let rebuilt = registry
            .get_or_insert_with("s1", || Arc::new(FakeClient(2)))
            .await;
        assert_eq!(rebuilt.0, 2);
    }
}
