// # altroute-core
//
// Core library for failing over to alternative API routing domains.
//
// ## Architecture Overview
//
// When the main backend looks blocked, alternative hostnames are discovered
// over DNS-over-HTTPS, probed through key-pinned clients, and the first
// working one is committed as the active backend:
// - **DohResolver**: ordered DoH providers, first non-empty answer wins
// - **ProxyHealthStore**: candidate health and persisted registry snapshots
// - **ClientFactory** / **PinningPolicy**: clients bound to one trust policy
// - **BackendProber**: one bounded reachability request per candidate
// - **FailoverOrchestrator**: single-flight resolution and atomic commit
// - **RecoveryGuards**: opportunistic return to the main backend
//
// ## Design Principles
//
// 1. **Fail closed**: a proxy is only trusted through its pinned key hash
// 2. **Safe default**: every failed or aborted cycle ends on MAIN
// 3. **Plugin-Based**: DoH transports are registered, not hardcoded
// 4. **Library-First**: the daemon is a thin wrapper around this crate

pub mod config;
pub mod context;
pub mod doh;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod probe;
pub mod recovery;
pub mod registry;
pub mod state;
pub mod traits;
pub mod transport;

// Re-export core types for convenience
pub use config::{AltRouteConfig, DohConfig, DohProviderConfig, StateStoreConfig};
pub use context::{ActiveBackend, BackendState, CommitOutcome, ConnectionContext};
pub use doh::DohResolver;
pub use error::{Error, Result};
pub use health::{ProxyCandidate, ProxyHealthStore, ProxyRegistry};
pub use orchestrator::{FailedAttempt, FailoverEvent, FailoverOrchestrator, ResolutionOutcome};
pub use probe::HttpBackendProber;
pub use recovery::{RecoveryGuards, RecoveryOutcome};
pub use registry::ProviderRegistry;
pub use state::{FileRegistryStore, MemoryRegistryStore};
pub use traits::{BackendProber, ConnectivitySignal, DohProvider, RegistryStore, RoutingPreference};
pub use transport::{ApiClient, ClientFactory, PinningPolicy};
