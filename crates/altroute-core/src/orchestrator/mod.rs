//! Failover orchestrator
//!
//! The FailoverOrchestrator is the only component that decides whether to
//! leave the main backend. A resolution cycle:
//!
//! ```text
//! trigger ──▶ preconditions ──✗──▶ commit MAIN (no I/O)
//!                  │
//!                  ✓
//!                  ▼
//!          single-flight guard ──held──▶ return immediately
//!                  │
//!                  ▼
//!   DohResolver ─▶ ProxyHealthStore::build_registry
//!                  │
//!                  ▼
//!          main reachable again? ──yes──▶ commit MAIN
//!                  │
//!                  no
//!                  ▼
//!   for each candidate: mark tried ─▶ pinned client ─▶ probe
//!       ok   ─▶ mark succeeded, persist, commit PROXY, stop
//!       fail ─▶ mark failed, next
//!                  │
//!                  ▼
//!          exhausted ─▶ persist, commit MAIN, emit failure
//! ```
//!
//! Candidates are probed through their own staged client; the shared
//! client in [`ConnectionContext`] only changes when a commit happens, so
//! a failed probe never leaves the shared client pointing at a proxy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::AltRouteConfig;
use crate::context::{BackendState, CommitOutcome, ConnectionContext};
use crate::doh::DohResolver;
use crate::error::{Error, Result};
use crate::health::{ProxyCandidate, ProxyHealthStore, ProxyRegistry, now_millis};
use crate::recovery::RecoveryGuards;
use crate::traits::{BackendProber, ConnectivitySignal, RoutingPreference};
use crate::transport::ClientFactory;

/// Events emitted by the orchestrator and the recovery guards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverEvent {
    /// A resolution cycle started
    ResolutionStarted,

    /// A resolution cycle committed a working backend
    ResolutionFinished { backend: BackendState },

    /// A resolution cycle found nothing usable and fell back to MAIN
    ResolutionFailed { attempts: Vec<FailedAttempt> },

    /// Traffic moved back from a proxy to MAIN
    SwitchedToMain {
        /// How long the proxy had been in use, if known
        dwell_ms: Option<i64>,
    },
}

/// A candidate that was tried and why it was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub base_url: String,
    pub reason: String,
}

/// Result of [`FailoverOrchestrator::trigger_resolution`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Another cycle holds the single-flight guard
    AlreadyRunning,
    /// Connectivity is implausible or routing is not allowed, before or
    /// during the cycle; MAIN committed
    Declined,
    /// The main backend answered the double-check; MAIN committed
    MainReachable,
    /// A proxy answered its probe and was committed
    SwitchedToProxy(ProxyCandidate),
    /// Every candidate failed; MAIN committed
    Exhausted { attempts: Vec<FailedAttempt> },
    /// The cycle could not run at all; MAIN committed
    Aborted { reason: String },
}

/// Releases the single-flight flag when dropped, including when the owning
/// future is cancelled.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Single-flight failover coordinator
///
/// ## Lifecycle
///
/// 1. Create with [`FailoverOrchestrator::new()`], keep the event receiver
/// 2. Optionally [`FailoverOrchestrator::resume()`] from the persisted snapshot
/// 3. Call [`FailoverOrchestrator::trigger_resolution()`] whenever the main
///    backend looks blocked
/// 4. Run [`RecoveryGuards`] to come back to MAIN
pub struct FailoverOrchestrator {
    resolver: DohResolver,
    health: Arc<ProxyHealthStore>,
    prober: Arc<dyn BackendProber>,
    connectivity: Arc<dyn ConnectivitySignal>,
    preference: Arc<dyn RoutingPreference>,
    factory: Arc<ClientFactory>,
    context: Arc<ConnectionContext>,
    timeout: Duration,
    in_flight: AtomicBool,
    event_tx: mpsc::Sender<FailoverEvent>,
}

impl FailoverOrchestrator {
    /// Create a new orchestrator committed to MAIN
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver)
    pub fn new(
        config: &AltRouteConfig,
        resolver: DohResolver,
        health: Arc<ProxyHealthStore>,
        prober: Arc<dyn BackendProber>,
        connectivity: Arc<dyn ConnectivitySignal>,
        preference: Arc<dyn RoutingPreference>,
    ) -> Result<(Self, mpsc::Receiver<FailoverEvent>)> {
        config.validate()?;

        let timeout = config.attempt_timeout();
        let factory = Arc::new(ClientFactory::new(config)?);
        let context = Arc::new(ConnectionContext::new(Arc::clone(&factory), timeout)?);
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let orchestrator = Self {
            resolver,
            health,
            prober,
            connectivity,
            preference,
            factory,
            context,
            timeout,
            in_flight: AtomicBool::new(false),
            event_tx: tx,
        };

        Ok((orchestrator, rx))
    }

    /// Shared backend state
    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }

    /// Client factory used for every backend
    pub fn client_factory(&self) -> &Arc<ClientFactory> {
        &self.factory
    }

    /// Whether traffic currently goes through a proxy
    pub fn is_on_proxy(&self) -> bool {
        self.context.is_on_proxy()
    }

    /// Whether a resolution cycle is running
    pub fn is_resolving(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Recovery guards sharing this orchestrator's state and event channel
    pub fn recovery_guards(&self) -> RecoveryGuards {
        RecoveryGuards::new(
            Arc::clone(&self.context),
            Arc::clone(&self.factory),
            Arc::clone(&self.prober),
            self.timeout,
            self.event_tx.clone(),
        )
    }

    /// Run one resolution cycle unless one is already running
    ///
    /// Never queues: a concurrent call returns
    /// [`ResolutionOutcome::AlreadyRunning`] at once.
    pub async fn trigger_resolution(&self) -> ResolutionOutcome {
        if !self.preconditions_hold().await {
            info!("Alternative routing not attempted; staying on main backend");
            if let Err(e) = self.context.commit_main().await {
                error!("Failed to commit main backend: {}", e);
            }
            return ResolutionOutcome::Declined;
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("Resolution already in flight, ignoring trigger");
            return ResolutionOutcome::AlreadyRunning;
        };

        self.emit(FailoverEvent::ResolutionStarted);
        info!("Resolution started");

        match self.run_cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Resolution aborted: {}", e);
                self.fall_back_to_main().await;
                self.emit(FailoverEvent::ResolutionFailed {
                    attempts: Vec::new(),
                });
                ResolutionOutcome::Aborted {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Commit MAIN right away
    ///
    /// Calling it while already on MAIN only checks the state.
    pub async fn force_switch_to_main(&self) -> Result<CommitOutcome> {
        let outcome = self.context.commit_main().await?;
        if let CommitOutcome::Switched { previous } = &outcome {
            let dwell_ms = previous
                .candidate()
                .map(|candidate| now_millis() - candidate.last_trial_timestamp);
            info!("Forced switch to main backend from {}", previous);
            self.emit(FailoverEvent::SwitchedToMain { dwell_ms });
        }
        Ok(outcome)
    }

    /// Reuse the persisted active proxy without querying DoH
    ///
    /// Only a candidate that has answered before is considered. Returns the
    /// committed candidate, or `None` if nothing was resumed.
    pub async fn resume(&self) -> Option<ProxyCandidate> {
        if !self.preconditions_hold().await {
            return None;
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return None;
        };

        let mut registry = self.health.snapshot().await?;
        let base_url = registry
            .active
            .clone()
            .or_else(|| registry.last_working_domain.clone())?;
        if registry
            .get(&base_url)
            .is_none_or(|c| c.last_success_timestamp.is_none())
        {
            debug!("No previously working proxy to resume");
            return None;
        }

        info!("Resuming previously working proxy {}", base_url);
        registry.mark_tried(&base_url, now_millis());
        match self.probe_candidate(&base_url).await {
            Ok(()) => match self.accept_candidate(&mut registry, &base_url).await {
                Ok(Some(candidate)) => {
                    self.emit(FailoverEvent::ResolutionFinished {
                        backend: BackendState::Proxy(candidate.clone()),
                    });
                    Some(candidate)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("Could not commit resumed proxy {}: {}", base_url, e);
                    None
                }
            },
            Err(e) => {
                info!("Persisted proxy {} no longer answers: {}", base_url, e);
                registry.mark_failed(&base_url, now_millis());
                self.persist(&registry).await;
                None
            }
        }
    }

    async fn preconditions_hold(&self) -> bool {
        if !self.preference.allow_alternative_routing() {
            debug!("Alternative routing disabled by user preference");
            return false;
        }
        if !self.connectivity.is_plausible().await {
            debug!("Connectivity not plausible");
            return false;
        }
        true
    }

    async fn run_cycle(&self) -> Result<ResolutionOutcome> {
        let fresh = match self.resolver.resolve_alternatives().await {
            Ok(hosts) => hosts,
            Err(e) if e.is_fatal_to_cycle() => return Err(e),
            Err(e) => {
                warn!("DoH resolution failed: {}", e);
                Vec::new()
            }
        };

        let mut registry = self.health.build_registry(&fresh).await;

        if self.main_reachable().await {
            info!("Main backend answered, no failover needed");
            self.context.commit_main().await?;
            self.emit(FailoverEvent::ResolutionFinished {
                backend: BackendState::Main,
            });
            return Ok(ResolutionOutcome::MainReachable);
        }

        let mut attempts = Vec::new();
        let order: Vec<String> = registry
            .proxies
            .iter()
            .map(|p| p.base_url.clone())
            .collect();

        for base_url in order {
            info!("Trying alternative route {}", base_url);
            registry.mark_tried(&base_url, now_millis());

            let result = match self.probe_candidate(&base_url).await {
                Ok(()) => self.accept_candidate(&mut registry, &base_url).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(Some(candidate)) => {
                    self.emit(FailoverEvent::ResolutionFinished {
                        backend: BackendState::Proxy(candidate.clone()),
                    });
                    return Ok(ResolutionOutcome::SwitchedToProxy(candidate));
                }
                Ok(None) => {
                    self.emit(FailoverEvent::ResolutionFinished {
                        backend: BackendState::Main,
                    });
                    return Ok(ResolutionOutcome::Declined);
                }
                Err(e) => {
                    warn!("Alternative route {} rejected: {}", base_url, e);
                    registry.mark_failed(&base_url, now_millis());
                    attempts.push(FailedAttempt {
                        base_url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        warn!(
            "No alternative route answered ({} tried), staying on main backend",
            attempts.len()
        );
        if !registry.is_empty() {
            self.persist(&registry).await;
        }
        self.fall_back_to_main().await;
        self.emit(FailoverEvent::ResolutionFailed {
            attempts: attempts.clone(),
        });
        Ok(ResolutionOutcome::Exhausted { attempts })
    }

    /// Probe one candidate through a staged pinned client
    async fn probe_candidate(&self, base_url: &str) -> Result<()> {
        let client = self.factory.client_for(base_url, self.timeout)?;
        if !client.policy().is_explicit() {
            return Err(Error::config(format!(
                "{} is the main backend, not an alternative route",
                base_url
            )));
        }

        match tokio::time::timeout(self.timeout, self.prober.probe(&client)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                format!("probe of {}", base_url),
                self.timeout.as_secs(),
            )),
        }
    }

    /// Record success, persist and commit `base_url` as the active proxy
    ///
    /// The user preference is read again under the commit lock; if routing
    /// was disallowed meanwhile, MAIN is committed and `None` returned.
    async fn accept_candidate(
        &self,
        registry: &mut ProxyRegistry,
        base_url: &str,
    ) -> Result<Option<ProxyCandidate>> {
        registry.mark_succeeded(base_url, now_millis());

        let candidate = registry
            .get(base_url)
            .cloned()
            .ok_or_else(|| Error::Other(format!("{} vanished from registry", base_url)))?;

        let committed = self
            .context
            .commit_if(BackendState::Proxy(candidate.clone()), || {
                self.preference.allow_alternative_routing()
            })
            .await?;

        if committed.is_none() {
            info!(
                "Alternative routing disabled during resolution; not switching to {}",
                candidate.host()
            );
            self.persist(registry).await;
            self.fall_back_to_main().await;
            return Ok(None);
        }

        registry.set_active(base_url);
        self.persist(registry).await;
        info!("Switched to alternative route {}", candidate.host());
        Ok(Some(candidate))
    }

    async fn main_reachable(&self) -> bool {
        let client = match self.factory.main_client(self.timeout) {
            Ok(client) => client,
            Err(e) => {
                warn!("Cannot build main backend client: {}", e);
                return false;
            }
        };
        matches!(
            tokio::time::timeout(self.timeout, self.prober.probe(&client)).await,
            Ok(Ok(()))
        )
    }

    async fn persist(&self, registry: &ProxyRegistry) {
        if let Err(e) = self.health.persist(registry).await {
            warn!("Failed to persist proxy registry: {}", e);
        }
    }

    async fn fall_back_to_main(&self) {
        if let Err(e) = self.context.commit_main().await {
            error!("Failed to commit main backend: {}", e);
        }
    }

    fn emit(&self, event: FailoverEvent) {
        emit_event(&self.event_tx, event);
    }
}

/// Send `event` without blocking, dropping it if the channel is full
pub(crate) fn emit_event(tx: &mpsc::Sender<FailoverEvent>, event: FailoverEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Event receiver dropped");
        }
    }
}
