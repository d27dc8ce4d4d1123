// # Backend Prober Trait
//
// Issues one lightweight request through an [`ApiClient`] to decide whether
// its backend is reachable.

use async_trait::async_trait;

use crate::transport::ApiClient;

/// Trait for reachability probes
///
/// Implementations issue a single request and return. The caller wraps every
/// call in its own timeout; a probe must not retry.
///
/// A pinning failure on a proxy client must surface as
/// [`crate::Error::PinningViolation`] so the candidate is never selected.
#[async_trait]
pub trait BackendProber: Send + Sync {
    /// Probe the backend `client` is bound to
    async fn probe(&self, client: &ApiClient) -> Result<(), crate::Error>;
}
