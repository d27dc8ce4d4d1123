//! Inputs the host application feeds into the engine
//!
//! The engine only attempts a failover when connectivity is plausible (the
//! device is online at all) and the user has opted in to third-party routing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the device has any usable network at all
#[async_trait]
pub trait ConnectivitySignal: Send + Sync {
    /// `true` when a failure to reach the main backend is plausibly caused by
    /// blocking rather than by being offline
    async fn is_plausible(&self) -> bool;
}

/// User opt-in for routing through third-party domains
pub trait RoutingPreference: Send + Sync {
    /// Whether alternative routing is allowed
    fn allow_alternative_routing(&self) -> bool;
}

/// Connectivity signal that always reports plausible connectivity
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysPlausible;

#[async_trait]
impl ConnectivitySignal for AlwaysPlausible {
    async fn is_plausible(&self) -> bool {
        true
    }
}

/// In-process preference flag
#[derive(Debug)]
pub struct StaticPreference {
    allowed: AtomicBool,
}

impl StaticPreference {
    /// Create a preference with an initial value
    pub fn new(allowed: bool) -> Self {
        Self {
            allowed: AtomicBool::new(allowed),
        }
    }

    /// Change the preference
    pub fn set(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::SeqCst);
    }
}

impl Default for StaticPreference {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RoutingPreference for StaticPreference {
    fn allow_alternative_routing(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }
}
