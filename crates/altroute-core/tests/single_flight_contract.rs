//! Architectural Contract Test: Single-Flight Resolution
//!
//! Constraints verified:
//! - Concurrent triggers run exactly one DoH round and one probe sequence
//! - A second trigger while a cycle runs returns at once (no queuing)
//! - A cancelled cycle releases the guard
//! - Re-triggering after a cycle runs a fresh one (nothing memoized)

mod common;

use altroute_core::{FailoverEvent, ResolutionOutcome};
use common::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_run_one_probe_sequence() {
    let doh = ScriptedDohProvider::answering("google", &["p1.example.net", "p2.example.net"])
        .with_delay(Duration::from_millis(100));
    let doh_calls = doh.calls();
    let prober = ScriptedProber::new().with("https://p2.example.net/", ProbeScript::Ok);
    let mut h = harness(vec![doh], prober).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = Arc::clone(&h.orchestrator);
        handles.push(tokio::spawn(
            async move { orchestrator.trigger_resolution().await },
        ));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.expect("trigger task completes"));
    }

    let switched = outcomes
        .iter()
        .filter(|o| matches!(o, ResolutionOutcome::SwitchedToProxy(_)))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| **o == ResolutionOutcome::AlreadyRunning)
        .count();
    assert_eq!(switched, 1, "exactly one cycle ran");
    assert_eq!(skipped, 7, "every other trigger returned immediately");

    assert_eq!(doh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.prober.main_probes(), 1);
    assert_eq!(
        h.prober.proxy_probes(),
        vec!["https://p1.example.net/", "https://p2.example.net/"]
    );

    let started = h
        .drain_events()
        .into_iter()
        .filter(|e| *e == FailoverEvent::ResolutionStarted)
        .count();
    assert_eq!(started, 1);
}

#[tokio::test(start_paused = true)]
async fn trigger_during_cycle_does_not_wait() {
    let doh = ScriptedDohProvider::new("slow", DohScript::Hang);
    let h = harness(vec![doh], ScriptedProber::new()).await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let running = tokio::spawn(async move { orchestrator.trigger_resolution().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.orchestrator.is_resolving());

    let before = tokio::time::Instant::now();
    assert_eq!(
        h.orchestrator.trigger_resolution().await,
        ResolutionOutcome::AlreadyRunning
    );
    assert_eq!(tokio::time::Instant::now(), before);

    let outcome = running.await.expect("cycle completes");
    assert_eq!(outcome, ResolutionOutcome::Exhausted { attempts: vec![] });
    assert!(!h.orchestrator.is_resolving());
}

#[tokio::test(start_paused = true)]
async fn cancelled_cycle_releases_guard() {
    let doh = ScriptedDohProvider::new("slow", DohScript::Hang);
    let doh_calls = doh.calls();
    let h = harness(vec![doh], ScriptedProber::new()).await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let task = tokio::spawn(async move { orchestrator.trigger_resolution().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.orchestrator.is_resolving());

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert!(!h.orchestrator.is_resolving(), "guard released on cancel");
    assert!(!h.orchestrator.is_on_proxy(), "no state change on cancel");

    let outcome = h.orchestrator.trigger_resolution().await;
    assert_ne!(outcome, ResolutionOutcome::AlreadyRunning);
    assert_eq!(doh_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn retrigger_runs_a_fresh_cycle() {
    let doh = ScriptedDohProvider::answering("google", &["p1.example.net"]);
    let doh_calls = doh.calls();
    let prober = ScriptedProber::new().with(MAIN_URL, ProbeScript::Ok);
    let h = harness(vec![doh], prober).await;

    assert_eq!(
        h.orchestrator.trigger_resolution().await,
        ResolutionOutcome::MainReachable
    );
    assert_eq!(
        h.orchestrator.trigger_resolution().await,
        ResolutionOutcome::MainReachable
    );

    assert_eq!(doh_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.prober.main_probes(), 2);
    assert!(h.prober.proxy_probes().is_empty());
}
