//! Plugin-based DoH provider registry
//!
//! DoH providers are registered by type name at runtime so the core never
//! hardcodes a transport.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use altroute_core::registry::ProviderRegistry;
//!
//! let registry = ProviderRegistry::new();
//! altroute_doh::register(&registry);
//!
//! let providers = registry.create_doh_providers(&config.doh)?;
//! ```

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{DohConfig, DohProviderConfig};
use crate::error::{Error, Result};
use crate::traits::{DohProvider, DohProviderFactory};

/// Registry of DoH provider factories keyed by type name
///
/// Registration and lookup may happen concurrently.
#[derive(Default)]
pub struct ProviderRegistry {
    doh_providers: DashMap<String, Arc<dyn DohProviderFactory>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DoH provider factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "https")
    /// - `factory`: Factory object for creating provider instances
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register_doh_provider(
        &self,
        name: impl Into<String>,
        factory: Box<dyn DohProviderFactory>,
    ) {
        self.doh_providers.insert(name.into(), Arc::from(factory));
    }

    /// Create one DoH provider from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DohProvider>)`: Created provider instance
    /// - `Err(Error)`: If the type is not registered or creation fails
    pub fn create_doh_provider(&self, config: &DohProviderConfig) -> Result<Box<dyn DohProvider>> {
        let provider_type = config.type_name();
        let factory = self
            .doh_providers
            .get(provider_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::config(format!("Unknown DoH provider type: {}", provider_type))
            })?;

        factory.create(config)
    }

    /// Create every configured DoH provider, keeping configuration order
    pub fn create_doh_providers(&self, config: &DohConfig) -> Result<Vec<Box<dyn DohProvider>>> {
        config
            .providers
            .iter()
            .map(|provider| self.create_doh_provider(provider))
            .collect()
    }

    /// List all registered DoH provider types
    pub fn list_doh_providers(&self) -> Vec<String> {
        self.doh_providers.iter().map(|e| e.key().clone()).collect()
    }

    /// Check if a DoH provider type is registered
    pub fn has_doh_provider(&self, name: &str) -> bool {
        self.doh_providers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NamedProvider(String);

    #[async_trait]
    impl DohProvider for NamedProvider {
        async fn query_txt(&self, _name: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn provider_name(&self) -> &str {
            &self.0
        }
    }

    struct MockFactory;

    impl DohProviderFactory for MockFactory {
        fn create(&self, config: &DohProviderConfig) -> Result<Box<dyn DohProvider>> {
            match config {
                DohProviderConfig::Custom { config, .. } => Ok(Box::new(NamedProvider(
                    config["name"].as_str().unwrap_or("unnamed").to_string(),
                ))),
                _ => Err(Error::config("mock only builds custom providers")),
            }
        }
    }

    fn custom(name: &str) -> DohProviderConfig {
        DohProviderConfig::Custom {
            factory: "mock".to_string(),
            config: serde_json::json!({ "name": name }),
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ProviderRegistry::new();
        assert!(!registry.has_doh_provider("mock"));

        registry.register_doh_provider("mock", Box::new(MockFactory));

        assert!(registry.has_doh_provider("mock"));
        assert_eq!(registry.list_doh_providers(), vec!["mock".to_string()]);
    }

    #[test]
    fn providers_are_created_in_config_order() {
        let registry = ProviderRegistry::new();
        registry.register_doh_provider("mock", Box::new(MockFactory));

        let config = DohConfig {
            txt_record: "alt.example.com".to_string(),
            providers: vec![custom("first"), custom("second")],
        };
        let providers = registry.create_doh_providers(&config).unwrap();
        let names: Vec<_> = providers.iter().map(|p| p.provider_name()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn unknown_type_is_config_error() {
        let registry = ProviderRegistry::new();
        let result = registry.create_doh_provider(&DohProviderConfig::https(
            "https://dns.example/dns-query",
        ));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
