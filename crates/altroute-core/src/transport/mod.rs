//! Transport clients bound to one trust policy
//!
//! [`ClientFactory`] hands out [`ApiClient`]s for an endpoint. The policy is
//! chosen by the endpoint: the configured main base URL gets
//! [`PinningPolicy::TrustStore`], every other endpoint gets
//! [`PinningPolicy::ExplicitKeyHashes`] with the proxy allow-list.
//!
//! Underlying HTTP clients are cached per `(endpoint, policy)` so repeated
//! use reuses connections and TLS sessions. A new endpoint or policy always
//! produces a new cache entry; existing clients are never re-keyed.

pub mod pinning;

pub use pinning::{PinningPolicy, spki_der_sha256_base64, spki_sha256_base64};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::config::{AltRouteConfig, normalize_base_url};
use crate::error::{Error, Result};

/// HTTP client for one backend base URL
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    policy: PinningPolicy,
    timeout: Duration,
    http: reqwest::Client,
}

impl ApiClient {
    /// Base URL this client talks to (trailing slash)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Trust policy the client was built with
    pub fn policy(&self) -> &PinningPolicy {
        &self.policy
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Underlying HTTP client
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Absolute URL for `path` below the base URL
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("pinned", &self.policy.is_explicit())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    endpoint: String,
    policy: PinningPolicy,
}

/// Builds and caches [`ApiClient`]s
pub struct ClientFactory {
    main_base_url: String,
    main_policy: PinningPolicy,
    proxy_policy: PinningPolicy,
    cache: DashMap<ClientKey, reqwest::Client>,
    builds: AtomicUsize,
}

impl ClientFactory {
    /// Create a factory from configuration
    pub fn new(config: &AltRouteConfig) -> Result<Self> {
        let main_base_url = normalize_base_url(&config.main_base_url)?;
        if config.proxy_key_hashes.is_empty() {
            return Err(Error::config("Proxy key hash allow-list cannot be empty"));
        }

        Ok(Self {
            main_base_url,
            main_policy: PinningPolicy::TrustStore {
                extra_key_hashes: config.main_key_hashes.iter().cloned().collect(),
            },
            proxy_policy: PinningPolicy::ExplicitKeyHashes(
                config.proxy_key_hashes.iter().cloned().collect::<BTreeSet<_>>(),
            ),
            cache: DashMap::new(),
            builds: AtomicUsize::new(0),
        })
    }

    /// Normalized main base URL
    pub fn main_base_url(&self) -> &str {
        &self.main_base_url
    }

    /// Whether `endpoint` is the main backend
    pub fn is_main(&self, endpoint: &str) -> bool {
        normalize_base_url(endpoint).is_ok_and(|url| url == self.main_base_url)
    }

    /// Policy an endpoint must be connected with
    pub fn policy_for(&self, endpoint: &str) -> PinningPolicy {
        if self.is_main(endpoint) {
            self.main_policy.clone()
        } else {
            self.proxy_policy.clone()
        }
    }

    /// Client for `endpoint` with its required policy
    pub fn client_for(&self, endpoint: &str, timeout: Duration) -> Result<ApiClient> {
        let policy = self.policy_for(endpoint);
        self.build_client(endpoint, timeout, &policy)
    }

    /// Client for the main backend
    pub fn main_client(&self, timeout: Duration) -> Result<ApiClient> {
        self.build_client(&self.main_base_url, timeout, &self.main_policy)
    }

    /// Client for `endpoint` bound to `policy`
    ///
    /// Non-main endpoints are always pinned and always https: a trust-store
    /// policy or a plaintext scheme for one is rejected.
    pub fn build_client(
        &self,
        endpoint: &str,
        timeout: Duration,
        policy: &PinningPolicy,
    ) -> Result<ApiClient> {
        let endpoint = normalize_base_url(endpoint)?;
        if endpoint != self.main_base_url && !endpoint.starts_with("https://") {
            return Err(Error::config(format!(
                "{} is not the main backend and must be reached over https",
                endpoint
            )));
        }
        if !policy.is_explicit() && endpoint != self.main_base_url {
            return Err(Error::config(format!(
                "{} is not the main backend and must be key-pinned",
                endpoint
            )));
        }

        let key = ClientKey {
            endpoint: endpoint.clone(),
            policy: policy.clone(),
        };

        let http = match self.cache.get(&key) {
            Some(cached) => cached.value().clone(),
            None => {
                let built = Self::build_http(policy)?;
                self.builds.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Built {} client for {}",
                    if policy.is_explicit() { "pinned" } else { "trust-store" },
                    endpoint
                );
                self.cache.entry(key).or_insert(built).value().clone()
            }
        };

        Ok(ApiClient {
            base_url: endpoint,
            policy: policy.clone(),
            timeout,
            http,
        })
    }

    /// Number of distinct clients built so far
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn build_http(policy: &PinningPolicy) -> Result<reqwest::Client> {
        let tls = pinning::tls_config_for(policy)?;
        reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .build()
            .map_err(|e| Error::tls(format!("Failed to build HTTP client: {}", e)))
    }
}
