//! Test doubles and common utilities for failover contract tests
//!
//! Scripted DoH providers and probers record every call so tests can assert
//! exactly which network operations an engine operation performed.

#![allow(dead_code)]

use altroute_core::error::{Error, Result};
use altroute_core::traits::{BackendProber, ConnectivitySignal, DohProvider, StaticPreference};
use altroute_core::transport::ApiClient;
use altroute_core::{
    AltRouteConfig, DohResolver, FailoverEvent, FailoverOrchestrator, MemoryRegistryStore,
    ProxyHealthStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const MAIN_URL: &str = "https://api.example.com/";
pub const TXT_RECORD: &str = "alt.example.com";

/// Long enough to always hit the per-attempt timeout
pub const HANG: Duration = Duration::from_secs(3600);

/// What a scripted DoH provider answers
#[derive(Debug, Clone)]
pub enum DohScript {
    Answer(Vec<&'static str>),
    Fail,
    Hang,
}

/// A DoH provider that follows a script and counts its calls
pub struct ScriptedDohProvider {
    name: String,
    script: DohScript,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDohProvider {
    pub fn new(name: &str, script: DohScript) -> Self {
        Self {
            name: name.to_string(),
            script,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn answering(name: &str, hosts: &[&'static str]) -> Self {
        Self::new(name, DohScript::Answer(hosts.to_vec()))
    }

    /// Delay every answer by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared call counter (take it before boxing the provider)
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl DohProvider for ScriptedDohProvider {
    async fn query_txt(&self, name: &str) -> Result<Vec<String>> {
        assert_eq!(name, TXT_RECORD);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            DohScript::Answer(hosts) => Ok(hosts.iter().map(|h| h.to_string()).collect()),
            DohScript::Fail => Err(Error::provider(&self.name, "connection reset")),
            DohScript::Hang => {
                tokio::time::sleep(HANG).await;
                Ok(Vec::new())
            }
        }
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

/// What a scripted probe of one base URL does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeScript {
    Ok,
    Fail,
    PinMismatch,
    Hang,
}

/// A prober that answers per base URL and records every probe in order
pub struct ScriptedProber {
    scripts: Mutex<HashMap<String, ProbeScript>>,
    default: ProbeScript,
    delay: Duration,
    probed: Mutex<Vec<String>>,
}

impl ScriptedProber {
    /// Every unscripted URL (including MAIN) fails
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: ProbeScript::Fail,
            delay: Duration::ZERO,
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn with(self, base_url: &str, script: ProbeScript) -> Self {
        self.set(base_url, script);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Change the script for `base_url` while a test runs
    pub fn set(&self, base_url: &str, script: ProbeScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(base_url.to_string(), script);
    }

    /// Every probed base URL, in call order
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    /// Probes excluding the main backend
    pub fn proxy_probes(&self) -> Vec<String> {
        self.probed()
            .into_iter()
            .filter(|url| url != MAIN_URL)
            .collect()
    }

    pub fn main_probes(&self) -> usize {
        self.probed().iter().filter(|url| *url == MAIN_URL).count()
    }

    pub fn total_probes(&self) -> usize {
        self.probed.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl BackendProber for ScriptedProber {
    async fn probe(&self, client: &ApiClient) -> Result<()> {
        let base_url = client.base_url().to_string();
        self.probed.lock().unwrap().push(base_url.clone());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&base_url)
            .copied()
            .unwrap_or(self.default);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match script {
            ProbeScript::Ok => Ok(()),
            ProbeScript::Fail => Err(Error::network(format!("{} refused", base_url))),
            ProbeScript::PinMismatch => {
                assert!(client.policy().is_explicit(), "proxy probed without pinning");
                Err(Error::pinning_violation(base_url))
            }
            ProbeScript::Hang => {
                tokio::time::sleep(HANG).await;
                Ok(())
            }
        }
    }
}

/// Connectivity signal a test can flip
#[derive(Default)]
pub struct ToggleConnectivity {
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl ToggleConnectivity {
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ConnectivitySignal for ToggleConnectivity {
    async fn is_plausible(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        !self.offline.load(Ordering::SeqCst)
    }
}

/// Minimal valid configuration
pub fn minimal_config() -> AltRouteConfig {
    let mut config = AltRouteConfig::new(MAIN_URL, TXT_RECORD, vec!["test-pin".to_string()]);
    config.attempt_timeout_secs = 5;
    config.event_channel_capacity = 100;
    config
}

/// Everything a contract test needs to drive and observe one orchestrator
pub struct Harness {
    pub orchestrator: Arc<FailoverOrchestrator>,
    pub events: mpsc::Receiver<FailoverEvent>,
    pub prober: Arc<ScriptedProber>,
    pub health: Arc<ProxyHealthStore>,
    pub store: MemoryRegistryStore,
    pub connectivity: Arc<ToggleConnectivity>,
    pub preference: Arc<StaticPreference>,
}

impl Harness {
    /// Drain every event emitted so far
    pub fn drain_events(&mut self) -> Vec<FailoverEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Build a harness over a fresh memory store
pub async fn harness(providers: Vec<ScriptedDohProvider>, prober: ScriptedProber) -> Harness {
    harness_with_store(providers, prober, MemoryRegistryStore::new()).await
}

/// Build a harness over `store`, restoring whatever it already holds
pub async fn harness_with_store(
    providers: Vec<ScriptedDohProvider>,
    prober: ScriptedProber,
    store: MemoryRegistryStore,
) -> Harness {
    let config = minimal_config();
    let providers: Vec<Box<dyn DohProvider>> = providers
        .into_iter()
        .map(|p| Box::new(p) as Box<dyn DohProvider>)
        .collect();
    let resolver = DohResolver::new(providers, TXT_RECORD, config.attempt_timeout())
        .expect("resolver construction succeeds");

    let health = Arc::new(ProxyHealthStore::open(Box::new(store.clone()), "test-session").await);
    let prober = Arc::new(prober);
    let connectivity = Arc::new(ToggleConnectivity::default());
    let preference = Arc::new(StaticPreference::new(true));

    let (orchestrator, events) = FailoverOrchestrator::new(
        &config,
        resolver,
        Arc::clone(&health),
        prober.clone(),
        connectivity.clone(),
        preference.clone(),
    )
    .expect("orchestrator construction succeeds");

    Harness {
        orchestrator: Arc::new(orchestrator),
        events,
        prober,
        health,
        store,
        connectivity,
        preference,
    }
}
