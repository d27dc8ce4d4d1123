// # Memory Registry Store
//
// In-memory implementation of RegistryStore.
//
// All snapshots are lost on restart, so the first cycle after a restart
// always performs a fresh DoH round. Useful for tests and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::health::ProxyRegistry;
use crate::traits::RegistryStore;

/// In-memory registry store
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistryStore {
    inner: Arc<RwLock<HashMap<String, ProxyRegistry>>>,
}

impl MemoryRegistryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with a snapshot
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self, session_id: &str) -> Result<Option<ProxyRegistry>, Error> {
        Ok(self.inner.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, registry: &ProxyRegistry) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(session_id.to_string(), registry.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
