//! Configuration types for the failover engine
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use url::Url;

/// Default per-attempt timeout (DoH call, probe, main ping)
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 20;

/// Default path hit by the lightweight reachability probe
pub const DEFAULT_PROBE_PATH: &str = "tests/ping";

/// Default DoH endpoints, each run by a different operator
pub const DEFAULT_DOH_PROVIDERS: &[&str] = &[
    "https://dns.google/dns-query",
    "https://dns11.quad9.net/dns-query",
    "https://cloudflare-dns.com/dns-query",
];

/// Main failover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AltRouteConfig {
    /// Main backend base URL
    pub main_base_url: String,

    /// Optional SPKI pins checked on top of the system trust store for the
    /// main backend
    #[serde(default)]
    pub main_key_hashes: Vec<String>,

    /// SPKI allow-list for every alternative routing domain
    pub proxy_key_hashes: Vec<String>,

    /// DoH resolution settings
    pub doh: DohConfig,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Path used by the reachability probe, relative to a base URL
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    /// Persisted user opt-in for third-party routing
    #[serde(default = "default_true")]
    pub allow_alternative_routing: bool,

    /// Key of the persisted registry snapshot
    #[serde(default = "default_session_id")]
    pub session_id: String,

    /// Registry persistence
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Capacity of the failover event channel
    ///
    /// When full, events are dropped with a warning.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Interval of the periodic recovery guard (daemon only)
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
}

impl AltRouteConfig {
    /// Create a configuration with defaults for everything optional
    pub fn new(
        main_base_url: impl Into<String>,
        txt_record: impl Into<String>,
        proxy_key_hashes: Vec<String>,
    ) -> Self {
        Self {
            main_base_url: main_base_url.into(),
            main_key_hashes: Vec::new(),
            proxy_key_hashes,
            doh: DohConfig::new(txt_record),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            probe_path: default_probe_path(),
            allow_alternative_routing: true,
            session_id: default_session_id(),
            state_store: StateStoreConfig::default(),
            event_channel_capacity: default_event_channel_capacity(),
            recovery_interval_secs: default_recovery_interval_secs(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        normalize_base_url(&self.main_base_url)?;

        if self.proxy_key_hashes.is_empty() {
            return Err(crate::Error::config(
                "Proxy key hash allow-list cannot be empty",
            ));
        }
        if self.proxy_key_hashes.iter().any(|h| h.trim().is_empty()) {
            return Err(crate::Error::config("Proxy key hashes cannot be blank"));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(crate::Error::config("Attempt timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.session_id.is_empty() {
            return Err(crate::Error::config("Session id cannot be empty"));
        }

        self.doh.validate()?;

        Ok(())
    }

    /// Per-attempt timeout as a [`std::time::Duration`]
    pub fn attempt_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// DoH resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DohConfig {
    /// Fixed TXT record listing alternative hostnames
    pub txt_record: String,

    /// Providers, queried in order until one returns a non-empty answer
    #[serde(default = "default_doh_providers")]
    pub providers: Vec<DohProviderConfig>,
}

impl DohConfig {
    /// Create a DoH configuration using the default providers
    pub fn new(txt_record: impl Into<String>) -> Self {
        Self {
            txt_record: txt_record.into(),
            providers: default_doh_providers(),
        }
    }

    /// Validate the DoH configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.txt_record.trim().is_empty() {
            return Err(crate::Error::config("DoH TXT record name cannot be empty"));
        }
        if self.providers.is_empty() {
            return Err(crate::Error::config("No DoH providers configured"));
        }
        for provider in &self.providers {
            provider.validate()?;
        }
        Ok(())
    }
}

/// DoH provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DohProviderConfig {
    /// RFC 8484 endpoint queried with `GET ?dns=<base64url>`
    Https {
        /// Endpoint URL, e.g. `https://dns.google/dns-query`
        url: String,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl DohProviderConfig {
    /// Shorthand for an HTTPS provider
    pub fn https(url: impl Into<String>) -> Self {
        Self::Https { url: url.into() }
    }

    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            DohProviderConfig::Https { url } => {
                let parsed = Url::parse(url).map_err(|e| {
                    crate::Error::config(format!("Invalid DoH provider URL '{}': {}", url, e))
                })?;
                if parsed.scheme() != "https" {
                    return Err(crate::Error::config(format!(
                        "DoH provider must use https: {}",
                        url
                    )));
                }
                Ok(())
            }
            DohProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom DoH provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom DoH provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            DohProviderConfig::Https { .. } => "https",
            DohProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Registry store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based store
    File {
        /// Path to the snapshot file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,
}

/// Parse `raw` and return it with exactly one trailing slash.
///
/// Fails with [`crate::Error::Config`] for anything that is not an
/// absolute `https` (or `http`, accepted for the main backend only) URL
/// with a host.
pub fn normalize_base_url(raw: &str) -> Result<String, crate::Error> {
    let url = Url::parse(raw.trim())
        .map_err(|e| crate::Error::config(format!("Malformed URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
        return Err(crate::Error::config(format!(
            "URL must be http(s) with a host: {}",
            raw
        )));
    }

    let mut normalized = url.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}

fn default_attempt_timeout_secs() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_SECS
}

fn default_probe_path() -> String {
    DEFAULT_PROBE_PATH.to_string()
}

fn default_true() -> bool {
    true
}

fn default_session_id() -> String {
    "default".to_string()
}

fn default_event_channel_capacity() -> usize {
    64
}

fn default_recovery_interval_secs() -> u64 {
    300
}

fn default_doh_providers() -> Vec<DohProviderConfig> {
    DEFAULT_DOH_PROVIDERS
        .iter()
        .map(|url| DohProviderConfig::https(*url))
        .collect()
}
