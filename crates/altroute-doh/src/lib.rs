// # DNS-over-HTTPS TXT Provider
//
// This crate provides an RFC 8484 DoH provider for the altroute engine.
//
// ## Protocol
//
// - Binary DNS query (TXT, recursion desired) encoded as base64url without
//   padding in the `dns` GET parameter
// - `Accept: application/dns-message`
// - Binary DNS response; TXT values are returned in answer order
//
// ## Registration
//
// ```rust,ignore
// let registry = altroute_core::ProviderRegistry::new();
// altroute_doh::register(&registry);
//
// // or, matching the engine's attempt timeout
// altroute_doh::register_with_timeout(&registry, config.attempt_timeout());
// ```

pub mod wire;

use altroute_core::config::DohProviderConfig;
use altroute_core::traits::{DohProvider, DohProviderFactory};
use altroute_core::{Error, ProviderRegistry, Result};

use std::time::Duration;

use url::Url;

pub use wire::{build_txt_query, encode_query_param, parse_txt_answers};

/// Media type for binary DNS messages
pub const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// Default request timeout of the HTTP client
///
/// The resolver applies its own per-provider budget on top of this.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

/// DoH provider talking to one RFC 8484 endpoint
pub struct HttpsDohProvider {
    /// Endpoint, e.g. `https://dns.google/dns-query`
    endpoint: Url,

    /// Name for logs (the endpoint host)
    name: String,

    /// HTTP client
    client: reqwest::Client,

    /// Per-request timeout of `client`
    timeout: Duration,
}

impl HttpsDohProvider {
    /// Create a provider for `endpoint`
    ///
    /// # Parameters
    ///
    /// - `endpoint`: RFC 8484 endpoint URL (https only)
    /// - `timeout`: per-request timeout
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("Invalid DoH endpoint '{}': {}", endpoint, e)))?;
        if endpoint.scheme() != "https" {
            return Err(Error::config(format!(
                "DoH endpoint must use https: {}",
                endpoint
            )));
        }
        let name = endpoint
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| Error::config(format!("DoH endpoint has no host: {}", endpoint)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build DoH client: {}", e)))?;

        Ok(Self {
            endpoint,
            name,
            client,
            timeout,
        })
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full request URL for an encoded query
    fn request_url(&self, query: &[u8]) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("dns", &encode_query_param(query));
        url
    }
}

#[async_trait::async_trait]
impl DohProvider for HttpsDohProvider {
    async fn query_txt(&self, name: &str) -> Result<Vec<String>> {
        let query = build_txt_query(name)?;
        let url = self.request_url(&query);
        tracing::debug!("DoH query {} via {}", name, url);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| Error::provider(&self.name, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::provider(
                &self.name,
                format!("HTTP error: {}", response.status()),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::provider(&self.name, format!("Failed to read response: {}", e)))?;

        let texts = parse_txt_answers(&body)?;
        tracing::debug!("DoH provider {} returned {} TXT value(s)", self.name, texts.len());
        Ok(texts)
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

/// Factory for [`HttpsDohProvider`]
pub struct HttpsDohFactory {
    timeout: Duration,
}

impl HttpsDohFactory {
    /// Factory whose providers use `timeout` per request
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Request timeout handed to every provider
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpsDohFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

impl DohProviderFactory for HttpsDohFactory {
    fn create(&self, config: &DohProviderConfig) -> Result<Box<dyn DohProvider>> {
        match config {
            DohProviderConfig::Https { url } => {
                Ok(Box::new(HttpsDohProvider::new(url, self.timeout)?))
            }
            _ => Err(Error::config("Invalid config for the https DoH provider")),
        }
    }
}

/// Register the https DoH provider with the registry
pub fn register(registry: &ProviderRegistry) {
    registry.register_doh_provider("https", Box::new(HttpsDohFactory::default()));
}

/// Register the https DoH provider with a request timeout of `timeout`
pub fn register_with_timeout(registry: &ProviderRegistry, timeout: Duration) {
    registry.register_doh_provider("https", Box::new(HttpsDohFactory::new(timeout)));
}
