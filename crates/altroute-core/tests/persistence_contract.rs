//! Architectural Contract Test: Registry Persistence
//!
//! Constraints verified:
//! - A successful cycle persists health, active candidate and last working
//!   domain
//! - A restart resumes a known working proxy without any DoH query
//! - Candidates that never answered are not resumed

mod common;

use altroute_core::traits::RegistryStore;
use altroute_core::{MemoryRegistryStore, ProxyRegistry, ResolutionOutcome};
use common::*;
use std::sync::atomic::Ordering;

const P1: &str = "https://p1.example.net/";
const P2: &str = "https://p2.example.net/";

#[tokio::test(start_paused = true)]
async fn successful_cycle_persists_health() {
    let doh = ScriptedDohProvider::answering("google", &["p1.example.net", "p2.example.net"]);
    let prober = ScriptedProber::new().with(P2, ProbeScript::Ok);
    let h = harness(vec![doh], prober).await;

    h.orchestrator.trigger_resolution().await;

    let saved = h
        .store
        .load("test-session")
        .await
        .unwrap()
        .expect("registry saved");
    assert_eq!(saved.last_working_domain.as_deref(), Some(P2));
    assert_eq!(saved.active.as_deref(), Some(P2));

    let p1 = saved.get(P1).unwrap();
    assert!(p1.failed);
    assert!(p1.last_trial_timestamp > 0);
    assert!(p1.last_success_timestamp.is_none());

    let p2 = saved.get(P2).unwrap();
    assert!(!p2.failed);
    assert!(p2.last_success_timestamp.is_some());
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_without_doh() {
    let store = MemoryRegistryStore::new();
    {
        let doh = ScriptedDohProvider::answering("google", &["p1.example.net"]);
        let prober = ScriptedProber::new().with(P1, ProbeScript::Ok);
        let h = harness_with_store(vec![doh], prober, store.clone()).await;
        assert!(matches!(
            h.orchestrator.trigger_resolution().await,
            ResolutionOutcome::SwitchedToProxy(_)
        ));
    }

    let doh = ScriptedDohProvider::answering("google", &["p2.example.net"]);
    let doh_calls = doh.calls();
    let prober = ScriptedProber::new().with(P1, ProbeScript::Ok);
    let h = harness_with_store(vec![doh], prober, store).await;

    let resumed = h.orchestrator.resume().await.expect("proxy resumed");
    assert_eq!(resumed.base_url, P1);
    assert!(h.orchestrator.is_on_proxy());
    assert_eq!(doh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.prober.probed(), vec![P1]);
}

#[tokio::test(start_paused = true)]
async fn resume_ignores_candidates_that_never_answered() {
    let store = MemoryRegistryStore::new();
    let mut registry = ProxyRegistry::from_base_urls([P1]);
    registry.mark_failed(P1, 1_000);
    store.save("test-session", &registry).await.unwrap();

    let h = harness_with_store(
        vec![ScriptedDohProvider::answering("google", &[])],
        ScriptedProber::new().with(P1, ProbeScript::Ok),
        store,
    )
    .await;

    assert!(h.orchestrator.resume().await.is_none());
    assert_eq!(h.prober.total_probes(), 0);
    assert!(!h.orchestrator.is_on_proxy());
}

#[tokio::test(start_paused = true)]
async fn failed_resume_is_recorded() {
    let store = MemoryRegistryStore::new();
    let mut registry = ProxyRegistry::from_base_urls([P1]);
    registry.mark_succeeded(P1, 1_000);
    registry.set_active(P1);
    store.save("test-session", &registry).await.unwrap();

    let h = harness_with_store(
        vec![ScriptedDohProvider::answering("google", &[])],
        ScriptedProber::new(),
        store.clone(),
    )
    .await;

    assert!(h.orchestrator.resume().await.is_none());
    assert!(!h.orchestrator.is_on_proxy());
    let saved = store.load("test-session").await.unwrap().unwrap();
    assert!(saved.get(P1).unwrap().failed);
}
