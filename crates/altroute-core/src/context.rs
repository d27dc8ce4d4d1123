//! Committed backend and its shared client
//!
//! [`ConnectionContext`] owns the one process-wide [`BackendState`] together
//! with the [`ApiClient`] bound to it. Both live in a single immutable
//! [`ActiveBackend`] behind an [`ArcSwap`], so a reader always sees a state
//! and the client built for it, never one without the other.
//!
//! Writers serialize through `commit_lock`: the client is built first, then
//! the snapshot is swapped in one store. Readers never take the lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Error, Result};
use crate::health::ProxyCandidate;
use crate::transport::{ApiClient, ClientFactory};

/// Which backend traffic is routed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    /// The main backend, trusted through the system trust store
    Main,
    /// An alternative routing domain, trusted only through key pinning
    Proxy(ProxyCandidate),
}

impl BackendState {
    /// Whether this is a proxy state
    pub fn is_proxy(&self) -> bool {
        matches!(self, BackendState::Proxy(_))
    }

    /// The proxy candidate, if any
    pub fn candidate(&self) -> Option<&ProxyCandidate> {
        match self {
            BackendState::Main => None,
            BackendState::Proxy(candidate) => Some(candidate),
        }
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::Main => write!(f, "MAIN"),
            BackendState::Proxy(candidate) => write!(f, "PROXY({})", candidate.base_url),
        }
    }
}

/// A committed state and the client built for it
#[derive(Debug, Clone)]
pub struct ActiveBackend {
    state: BackendState,
    client: ApiClient,
}

impl ActiveBackend {
    /// Committed state
    pub fn state(&self) -> &BackendState {
        &self.state
    }

    /// Client matching [`ActiveBackend::state`]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

/// Result of [`ConnectionContext::commit_main`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Already on MAIN; nothing was rebuilt
    Unchanged,
    /// Switched to MAIN from `previous`
    Switched {
        /// State replaced by the commit
        previous: BackendState,
    },
}

/// Shared backend state with atomic commits
pub struct ConnectionContext {
    factory: Arc<ClientFactory>,
    timeout: Duration,
    current: ArcSwap<ActiveBackend>,
    commit_lock: Mutex<()>,
    generation: AtomicU64,
}

impl ConnectionContext {
    /// Create a context committed to MAIN
    pub fn new(factory: Arc<ClientFactory>, timeout: Duration) -> Result<Self> {
        let client = factory.main_client(timeout)?;
        Ok(Self {
            factory,
            timeout,
            current: ArcSwap::from_pointee(ActiveBackend {
                state: BackendState::Main,
                client,
            }),
            commit_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    /// Last fully committed backend
    pub fn snapshot(&self) -> Arc<ActiveBackend> {
        self.current.load_full()
    }

    /// Last committed state
    pub fn state(&self) -> BackendState {
        self.current.load().state.clone()
    }

    /// Client for the last committed state
    pub fn client(&self) -> ApiClient {
        self.current.load().client.clone()
    }

    /// Whether traffic currently goes through a proxy
    pub fn is_on_proxy(&self) -> bool {
        self.current.load().state.is_proxy()
    }

    /// Number of commits that replaced the snapshot
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Commit `state`, building its client first
    ///
    /// If the client cannot be built the previous snapshot stays in place.
    pub async fn commit(&self, state: BackendState) -> Result<Arc<ActiveBackend>> {
        let _lock = self.commit_lock.lock().await;
        let client = self.client_for_state(&state)?;
        Ok(self.swap(state, client))
    }

    /// Commit `state` only if `allowed` still holds under the commit lock
    ///
    /// Returns `None` and leaves the snapshot untouched when it does not.
    /// A MAIN commit racing this one is therefore never overwritten by a
    /// decision taken before it.
    pub async fn commit_if<F>(
        &self,
        state: BackendState,
        allowed: F,
    ) -> Result<Option<Arc<ActiveBackend>>>
    where
        F: FnOnce() -> bool,
    {
        let _lock = self.commit_lock.lock().await;
        if !allowed() {
            return Ok(None);
        }
        let client = self.client_for_state(&state)?;
        Ok(Some(self.swap(state, client)))
    }

    /// Commit MAIN unless it is already committed
    pub async fn commit_main(&self) -> Result<CommitOutcome> {
        let _lock = self.commit_lock.lock().await;

        let previous = self.current.load().state.clone();
        if previous == BackendState::Main {
            return Ok(CommitOutcome::Unchanged);
        }

        let client = self.factory.main_client(self.timeout)?;
        self.swap(BackendState::Main, client);
        Ok(CommitOutcome::Switched { previous })
    }

    fn client_for_state(&self, state: &BackendState) -> Result<ApiClient> {
        match state {
            BackendState::Main => self.factory.main_client(self.timeout),
            BackendState::Proxy(candidate) => {
                let client = self.factory.client_for(&candidate.base_url, self.timeout)?;
                if !client.policy().is_explicit() {
                    return Err(Error::config(format!(
                        "{} is the main backend and cannot be committed as a proxy",
                        candidate.base_url
                    )));
                }
                Ok(client)
            }
        }
    }

    fn swap(&self, state: BackendState, client: ApiClient) -> Arc<ActiveBackend> {
        let active = Arc::new(ActiveBackend { state, client });
        self.current.store(Arc::clone(&active));
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("Committed backend {}", active.state);
        active
    }
}
