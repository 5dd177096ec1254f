//! Registry of configured media server adapters, keyed by client id.

use bridge_traits::{ClientId, MediaClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<dyn MediaClient>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own client id, replacing any previous one.
    pub async fn register(&self, client: Arc<dyn MediaClient>) {
        let client_id = client.client_id().clone();
        info!(
            client_id = %client_id,
            kind = %client.kind(),
            capabilities = client.supported_capabilities().len(),
            "Registered media client"
        );
        self.clients.write().await.insert(client_id, client);
    }

    pub async fn get(&self, client_id: &ClientId) -> Option<Arc<dyn MediaClient>> {
        self.clients.read().await.get(client_id).cloned()
    }

    pub async fn remove(&self, client_id: &ClientId) -> Option<Arc<dyn MediaClient>> {
        self.clients.write().await.remove(client_id)
    }

    /// All registered adapters, ordered by client id
    pub async fn list(&self) -> Vec<Arc<dyn MediaClient>> {
        let clients = self.clients.read().await;
        let mut all: Vec<_> = clients.values().cloned().collect();
        all.sort_by(|a, b| a.client_id().cmp(b.client_id()));
        all
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::ClientKind;

    struct StubClient {
        id: ClientId,
    }

    #[async_trait]
    impl MediaClient for StubClient {
        fn client_id(&self) -> &ClientId {
            &self.id
        }

        fn kind(&self) -> ClientKind {
            ClientKind::Subsonic
        }
    }

    fn stub(id: &str) -> Arc<dyn MediaClient> {
        Arc::new(StubClient {
            id: ClientId::new(id),
        })
    }

    #[tokio::test]
    async fn test_register_get_remove() {
        let registry = ClientRegistry::new();
        registry.register(stub("navidrome")).await;
        registry.register(stub("jellyfin")).await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.get(&ClientId::new("navidrome")).await.is_some());
        assert!(registry.get(&ClientId::new("plex")).await.is_none());

        let ids: Vec<String> = registry
            .list()
            .await
            .iter()
            .map(|c| c.client_id().to_string())
            .collect();
        assert_eq!(ids, vec!["jellyfin", "navidrome"]);

        assert!(registry.remove(&ClientId::new("jellyfin")).await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_replaces_same_id() {
        let registry = ClientRegistry::new();
        registry.register(stub("a")).await;
        registry.register(stub("a")).await;
        assert_eq!(registry.len().await, 1);
    }
}
