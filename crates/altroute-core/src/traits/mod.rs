//! Core traits for the failover engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DohProvider`]: Fetch TXT records from one DNS-over-HTTPS operator
//! - [`BackendProber`]: Lightweight reachability check through a client
//! - [`RegistryStore`]: Durable proxy registry snapshots
//! - [`ConnectivitySignal`] / [`RoutingPreference`]: Inputs owned by the host application

pub mod backend_prober;
pub mod doh_provider;
pub mod registry_store;
pub mod signals;

pub use backend_prober::BackendProber;
pub use doh_provider::{DohProvider, DohProviderFactory};
pub use registry_store::RegistryStore;
pub use signals::{AlwaysPlausible, ConnectivitySignal, RoutingPreference, StaticPreference};
