// # Registry Store Trait
//
// Durable, per-session storage of the proxy registry so that repeated starts
// can reuse a known working proxy without a fresh DoH round.
//
// ## Implementations
//
// - [`crate::state::MemoryRegistryStore`]: not persistent
// - [`crate::state::FileRegistryStore`]: JSON file with atomic writes

use async_trait::async_trait;

use crate::health::ProxyRegistry;

/// Trait for registry store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load the snapshot for `session_id`
    ///
    /// - `Ok(None)`: nothing persisted for this session
    async fn load(&self, session_id: &str) -> Result<Option<ProxyRegistry>, crate::Error>;

    /// Replace the snapshot for `session_id`
    async fn save(&self, session_id: &str, registry: &ProxyRegistry)
    -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
