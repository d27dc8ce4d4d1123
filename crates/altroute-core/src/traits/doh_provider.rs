// # DoH Provider Trait
//
// Defines the interface for querying one DNS-over-HTTPS operator.
//
// ## Implementations
//
// - RFC 8484 over HTTPS: `altroute-doh` crate
//
// ## Usage
//
// ```rust,ignore
// use altroute_core::traits::DohProvider;
//
// let provider = /* DohProvider implementation */;
// let texts = provider.query_txt("alt.example.com").await?;
// ```

use async_trait::async_trait;

/// Trait for DoH provider implementations
///
/// A provider performs exactly one query per call. Timeouts, ordering and
/// fallback across providers are owned by [`crate::doh::DohResolver`].
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait DohProvider: Send + Sync {
    /// Query the TXT record `name` and return each record's text value in
    /// answer order.
    ///
    /// An empty list means the provider answered but had nothing.
    async fn query_txt(&self, name: &str) -> Result<Vec<String>, crate::Error>;

    /// Provider name (for logging/debugging)
    fn provider_name(&self) -> &str;
}

/// Helper trait for constructing DoH providers from configuration
pub trait DohProviderFactory: Send + Sync {
    /// Create a DohProvider instance from configuration
    fn create(
        &self,
        config: &crate::config::DohProviderConfig,
    ) -> Result<Box<dyn DohProvider>, crate::Error>;
}
