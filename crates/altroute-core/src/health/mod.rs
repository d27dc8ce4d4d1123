//! Proxy health bookkeeping
//!
//! A [`ProxyRegistry`] is the ordered candidate list for one resolution
//! cycle. [`ProxyHealthStore`] builds it from fresh DoH results (or the last
//! persisted snapshot) and persists it through a [`RegistryStore`].
//!
//! Timestamps are Unix milliseconds. A candidate's timestamps only ever move
//! forward; marking never touches sibling candidates.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::traits::RegistryStore;

/// Current time as Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One alternative routing domain and its health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyCandidate {
    /// Normalized base URL, always ending in `/`
    pub base_url: String,
    /// Last time this candidate was tried, 0 if never
    #[serde(default)]
    pub last_trial_timestamp: i64,
    /// Last time this candidate answered a probe
    #[serde(default)]
    pub last_success_timestamp: Option<i64>,
    /// Whether the last trial failed
    #[serde(default)]
    pub failed: bool,
}

impl ProxyCandidate {
    /// Create an untried candidate
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            last_trial_timestamp: 0,
            last_success_timestamp: None,
            failed: false,
        }
    }

    /// Hostname part of the base URL, for logging
    pub fn host(&self) -> &str {
        let rest = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        rest.split(['/', ':']).next().unwrap_or(rest)
    }
}

/// Ordered candidate list plus the last domain known to work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRegistry {
    /// Candidates in resolution order
    #[serde(default)]
    pub proxies: Vec<ProxyCandidate>,
    /// Base URL of the last candidate that answered a probe
    #[serde(default)]
    pub last_working_domain: Option<String>,
    /// Candidate explicitly flagged active by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
}

impl ProxyRegistry {
    /// Build a registry of untried candidates, dropping duplicates while
    /// keeping first-seen order.
    pub fn from_base_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut proxies: Vec<ProxyCandidate> = Vec::new();
        for url in urls {
            let url = url.into();
            if !proxies.iter().any(|p| p.base_url == url) {
                proxies.push(ProxyCandidate::new(url));
            }
        }
        Self {
            proxies,
            last_working_domain: None,
            active: None,
        }
    }

    /// Whether the registry has no candidates
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Number of candidates
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Look up a candidate by base URL
    pub fn get(&self, base_url: &str) -> Option<&ProxyCandidate> {
        self.proxies.iter().find(|p| p.base_url == base_url)
    }

    /// Whether `base_url` is a member of this registry
    pub fn contains(&self, base_url: &str) -> bool {
        self.get(base_url).is_some()
    }

    fn get_mut(&mut self, base_url: &str) -> Option<&mut ProxyCandidate> {
        self.proxies.iter_mut().find(|p| p.base_url == base_url)
    }

    /// Record that `base_url` is about to be tried
    ///
    /// Returns `false` if the candidate is unknown.
    pub fn mark_tried(&mut self, base_url: &str, now: i64) -> bool {
        match self.get_mut(base_url) {
            Some(candidate) => {
                if now > candidate.last_trial_timestamp {
                    candidate.last_trial_timestamp = now;
                }
                true
            }
            None => false,
        }
    }

    /// Record a successful probe of `base_url`
    pub fn mark_succeeded(&mut self, base_url: &str, now: i64) -> bool {
        match self.get_mut(base_url) {
            Some(candidate) => {
                if candidate.last_success_timestamp.is_none_or(|t| now > t) {
                    candidate.last_success_timestamp = Some(now);
                }
                candidate.failed = false;
                true
            }
            None => false,
        }
    }

    /// Record a failed probe of `base_url`
    pub fn mark_failed(&mut self, base_url: &str, now: i64) -> bool {
        match self.get_mut(base_url) {
            Some(candidate) => {
                if now > candidate.last_trial_timestamp {
                    candidate.last_trial_timestamp = now;
                }
                candidate.failed = true;
                true
            }
            None => false,
        }
    }

    /// Flag `base_url` as the active candidate and remember it as the last
    /// working domain.
    pub fn set_active(&mut self, base_url: &str) -> bool {
        if !self.contains(base_url) {
            return false;
        }
        self.active = Some(base_url.to_string());
        self.last_working_domain = Some(base_url.to_string());
        true
    }

    /// The candidate flagged active, defaulting to the first in list order
    pub fn current_active(&self) -> Option<&ProxyCandidate> {
        self.active
            .as_deref()
            .and_then(|url| self.get(url))
            .or_else(|| self.proxies.first())
    }

    /// Drop every candidate that is not reached over `https`
    ///
    /// Alternative routes are only trusted through key pinning, which needs
    /// TLS. Returns the number of candidates removed.
    pub fn retain_https(&mut self) -> usize {
        let before = self.proxies.len();
        self.proxies.retain(|p| is_https(&p.base_url));
        if self.active.as_deref().is_some_and(|url| !is_https(url)) {
            self.active = None;
        }
        if self
            .last_working_domain
            .as_deref()
            .is_some_and(|url| !is_https(url))
        {
            self.last_working_domain = None;
        }
        before - self.proxies.len()
    }
}

fn is_https(base_url: &str) -> bool {
    base_url.starts_with("https://")
}

/// Builds, tracks and persists [`ProxyRegistry`] snapshots for one session
pub struct ProxyHealthStore {
    store: Box<dyn RegistryStore>,
    session_id: String,
    snapshot: RwLock<Option<ProxyRegistry>>,
}

impl ProxyHealthStore {
    /// Create a health store without reading the backing store
    pub fn new(store: Box<dyn RegistryStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            snapshot: RwLock::new(None),
        }
    }

    /// Create a health store and restore the persisted snapshot
    ///
    /// A snapshot that cannot be read is logged and ignored.
    pub async fn open(store: Box<dyn RegistryStore>, session_id: impl Into<String>) -> Self {
        let health = Self::new(store, session_id);
        if let Err(e) = health.restore().await {
            warn!(
                "Could not restore proxy registry for session {}: {}",
                health.session_id, e
            );
        }
        health
    }

    /// Session this store is keyed on
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Read the persisted snapshot into memory
    pub async fn restore(&self) -> Result<Option<ProxyRegistry>> {
        let mut restored = self.store.load(&self.session_id).await?;
        if let Some(ref mut registry) = restored {
            let dropped = registry.retain_https();
            if dropped > 0 {
                warn!("Ignoring {} persisted candidate(s) not served over https", dropped);
            }
            debug!(
                "Restored proxy registry: {} candidate(s), last working: {:?}",
                registry.len(),
                registry.last_working_domain
            );
        }
        *self.snapshot.write().await = restored.clone();
        Ok(restored)
    }

    /// Last restored or persisted snapshot
    pub async fn snapshot(&self) -> Option<ProxyRegistry> {
        self.snapshot.read().await.clone()
    }

    /// Build the candidate list for a resolution cycle
    ///
    /// Prefers fresh DoH results; otherwise the persisted snapshot;
    /// otherwise a registry holding only the last working domain; otherwise
    /// an empty registry.
    pub async fn build_registry(&self, fresh: &[String]) -> ProxyRegistry {
        let previous = self.snapshot.read().await.clone();
        let last_working = previous.as_ref().and_then(|r| r.last_working_domain.clone());

        let mut fresh = ProxyRegistry::from_base_urls(fresh.iter().cloned());
        let dropped = fresh.retain_https();
        if dropped > 0 {
            warn!("Ignoring {} fresh candidate(s) not served over https", dropped);
        }
        if !fresh.is_empty() {
            fresh.last_working_domain = last_working;
            debug!("Built registry from {} fresh candidate(s)", fresh.len());
            return fresh;
        }

        if let Some(previous) = previous.filter(|r| !r.is_empty()) {
            info!(
                "No fresh candidates; reusing persisted registry ({} candidate(s))",
                previous.len()
            );
            return previous;
        }

        match last_working {
            Some(domain) => {
                info!("No candidate lists available; retrying last working domain");
                let mut registry = ProxyRegistry::from_base_urls([domain.clone()]);
                registry.last_working_domain = Some(domain);
                registry
            }
            None => ProxyRegistry::default(),
        }
    }

    /// The registry's active candidate
    pub fn current_active<'a>(&self, registry: &'a ProxyRegistry) -> Option<&'a ProxyCandidate> {
        registry.current_active()
    }

    /// Durably write `registry` and make it the in-memory snapshot
    pub async fn persist(&self, registry: &ProxyRegistry) -> Result<()> {
        self.store.save(&self.session_id, registry).await?;
        *self.snapshot.write().await = Some(registry.clone());
        Ok(())
    }

    /// Flush the backing store
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryRegistryStore;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn marking_touches_only_named_candidate() {
        let mut registry =
            ProxyRegistry::from_base_urls(urls(&["https://a.example/", "https://b.example/"]));

        assert!(registry.mark_tried("https://a.example/", 100));
        assert!(registry.mark_failed("https://a.example/", 150));

        let a = registry.get("https://a.example/").unwrap();
        assert_eq!(a.last_trial_timestamp, 150);
        assert!(a.failed);

        let b = registry.get("https://b.example/").unwrap();
        assert_eq!(b, &ProxyCandidate::new("https://b.example/"));

        assert!(!registry.mark_tried("https://missing.example/", 200));
    }

    #[test]
    fn timestamps_never_move_backwards() {
        let mut registry = ProxyRegistry::from_base_urls(urls(&["https://a.example/"]));
        registry.mark_tried("https://a.example/", 500);
        registry.mark_tried("https://a.example/", 400);
        registry.mark_succeeded("https://a.example/", 600);
        registry.mark_succeeded("https://a.example/", 550);

        let a = registry.get("https://a.example/").unwrap();
        assert_eq!(a.last_trial_timestamp, 500);
        assert_eq!(a.last_success_timestamp, Some(600));
        assert!(!a.failed);
    }

    #[test]
    fn duplicates_are_dropped_in_order() {
        let registry = ProxyRegistry::from_base_urls(urls(&[
            "https://b.example/",
            "https://a.example/",
            "https://b.example/",
        ]));
        let order: Vec<_> = registry.proxies.iter().map(|p| p.base_url.as_str()).collect();
        assert_eq!(order, vec!["https://b.example/", "https://a.example/"]);
    }

    #[test]
    fn current_active_defaults_to_first() {
        let mut registry =
            ProxyRegistry::from_base_urls(urls(&["https://a.example/", "https://b.example/"]));
        assert_eq!(registry.current_active().unwrap().base_url, "https://a.example/");

        assert!(registry.set_active("https://b.example/"));
        assert_eq!(registry.current_active().unwrap().base_url, "https://b.example/");
        assert_eq!(
            registry.last_working_domain.as_deref(),
            Some("https://b.example/")
        );

        assert!(!registry.set_active("https://zzz.example/"));
        assert!(ProxyRegistry::default().current_active().is_none());
    }

    #[test]
    fn host_strips_scheme_and_path() {
        let candidate = ProxyCandidate::new("https://proxy.example.net:8443/api/");
        assert_eq!(candidate.host(), "proxy.example.net");
    }

    #[test]
    fn persisted_shape_uses_camel_case() {
        let mut registry = ProxyRegistry::from_base_urls(urls(&["https://a.example/"]));
        registry.mark_tried("https://a.example/", 42);
        let json = serde_json::to_value(&registry).unwrap();
        assert_eq!(json["proxies"][0]["baseUrl"], "https://a.example/");
        assert_eq!(json["proxies"][0]["lastTrialTimestamp"], 42);
        assert!(json["proxies"][0]["lastSuccessTimestamp"].is_null());
        assert!(json["lastWorkingDomain"].is_null());
    }

    #[tokio::test]
    async fn build_prefers_fresh_results() {
        let health = ProxyHealthStore::new(Box::new(MemoryRegistryStore::new()), "s1");
        let mut old = ProxyRegistry::from_base_urls(urls(&["https://old.example/"]));
        old.set_active("https://old.example/");
        health.persist(&old).await.unwrap();

        let registry = health
            .build_registry(&urls(&["https://new.example/"]))
            .await;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.proxies[0], ProxyCandidate::new("https://new.example/"));
        assert_eq!(
            registry.last_working_domain.as_deref(),
            Some("https://old.example/")
        );
    }

    #[tokio::test]
    async fn build_falls_back_to_snapshot_then_last_working() {
        let store = MemoryRegistryStore::new();
        let health = ProxyHealthStore::new(Box::new(store.clone()), "s1");

        assert!(health.build_registry(&[]).await.is_empty());

        let mut old = ProxyRegistry::from_base_urls(urls(&["https://a.example/", "https://b.example/"]));
        old.mark_succeeded("https://b.example/", 10);
        old.set_active("https://b.example/");
        health.persist(&old).await.unwrap();
        assert_eq!(health.build_registry(&[]).await, old);

        let only_domain = ProxyRegistry {
            proxies: Vec::new(),
            last_working_domain: Some("https://b.example/".to_string()),
            active: None,
        };
        health.persist(&only_domain).await.unwrap();
        let registry = health.build_registry(&[]).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.proxies[0].base_url, "https://b.example/");
    }

    #[test]
    fn retain_https_drops_plaintext_candidates() {
        let mut registry = ProxyRegistry::from_base_urls(urls(&[
            "http://plain.example/",
            "https://a.example/",
        ]));
        registry.set_active("http://plain.example/");

        assert_eq!(registry.retain_https(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("https://a.example/"));
        assert_eq!(registry.active, None);
        assert_eq!(registry.last_working_domain, None);
    }

    #[tokio::test]
    async fn plaintext_candidates_never_enter_a_registry() {
        let store = MemoryRegistryStore::new();
        let mut persisted = ProxyRegistry::from_base_urls(urls(&["http://plain.example/"]));
        persisted.mark_succeeded("http://plain.example/", 10);
        persisted.set_active("http://plain.example/");
        store.save("s1", &persisted).await.unwrap();

        let health = ProxyHealthStore::open(Box::new(store), "s1").await;
        assert!(health.snapshot().await.unwrap().is_empty());
        assert!(health.build_registry(&[]).await.is_empty());
        assert!(
            health
                .build_registry(&urls(&["http://fresh.example/"]))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn open_restores_persisted_snapshot() {
        let store = MemoryRegistryStore::new();
        let registry = ProxyRegistry::from_base_urls(urls(&["https://a.example/"]));
        {
            let health = ProxyHealthStore::new(Box::new(store.clone()), "s1");
            health.persist(&registry).await.unwrap();
        }

        let reopened = ProxyHealthStore::open(Box::new(store.clone()), "s1").await;
        assert_eq!(reopened.snapshot().await, Some(registry));

        let other_session = ProxyHealthStore::open(Box::new(store), "s2").await;
        assert_eq!(other_session.snapshot().await, None);
    }
}
