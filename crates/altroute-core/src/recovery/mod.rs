//! Recovery guards
//!
//! Pull traffic back from a proxy to the main backend once the main backend
//! answers again. Guards share the [`ConnectionContext`] with the
//! orchestrator and commit through the same lock, so whichever commit lands
//! last is what readers observe.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info};

use crate::context::{CommitOutcome, ConnectionContext};
use crate::health::now_millis;
use crate::orchestrator::{FailoverEvent, emit_event};
use crate::traits::BackendProber;
use crate::transport::ClientFactory;

/// Result of a recovery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// MAIN was already committed
    AlreadyOnMain,
    /// Moved from a proxy back to MAIN
    SwitchedToMain {
        /// Time spent on the proxy since it was last tried
        dwell_ms: Option<i64>,
    },
    /// The main backend did not answer; state left untouched
    MainUnavailable,
}

/// Opportunistic PROXY → MAIN switching
#[derive(Clone)]
pub struct RecoveryGuards {
    context: Arc<ConnectionContext>,
    factory: Arc<ClientFactory>,
    prober: Arc<dyn BackendProber>,
    timeout: Duration,
    event_tx: mpsc::Sender<FailoverEvent>,
}

impl RecoveryGuards {
    /// Create guards over a shared context
    pub fn new(
        context: Arc<ConnectionContext>,
        factory: Arc<ClientFactory>,
        prober: Arc<dyn BackendProber>,
        timeout: Duration,
        event_tx: mpsc::Sender<FailoverEvent>,
    ) -> Self {
        Self {
            context,
            factory,
            prober,
            timeout,
            event_tx,
        }
    }

    /// Ping the main backend and commit MAIN if it answers
    pub async fn switch_to_main_if_available(&self) -> RecoveryOutcome {
        let client = match self.factory.main_client(self.timeout) {
            Ok(client) => client,
            Err(e) => {
                error!("Cannot build main backend client: {}", e);
                return RecoveryOutcome::MainUnavailable;
            }
        };

        match tokio::time::timeout(self.timeout, self.prober.probe(&client)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Main backend still unavailable: {}", e);
                return RecoveryOutcome::MainUnavailable;
            }
            Err(_) => {
                debug!("Main backend ping timed out after {:?}", self.timeout);
                return RecoveryOutcome::MainUnavailable;
            }
        }

        match self.context.commit_main().await {
            Ok(CommitOutcome::Unchanged) => RecoveryOutcome::AlreadyOnMain,
            Ok(CommitOutcome::Switched { previous }) => {
                let dwell_ms = previous
                    .candidate()
                    .map(|candidate| now_millis() - candidate.last_trial_timestamp);
                emit_event(&self.event_tx, FailoverEvent::SwitchedToMain { dwell_ms });
                RecoveryOutcome::SwitchedToMain { dwell_ms }
            }
            Err(e) => {
                error!("Failed to commit main backend: {}", e);
                RecoveryOutcome::MainUnavailable
            }
        }
    }

    /// Like [`RecoveryGuards::switch_to_main_if_available`], but does
    /// nothing (and no I/O) while MAIN is committed.
    pub async fn switch_to_main_if_on_proxy(&self) -> RecoveryOutcome {
        let state = self.context.state();
        let Some(candidate) = state.candidate() else {
            return RecoveryOutcome::AlreadyOnMain;
        };

        let outcome = self.switch_to_main_if_available().await;
        if let RecoveryOutcome::SwitchedToMain { dwell_ms } = &outcome {
            info!(
                "Back on main backend after {} ms on {}",
                dwell_ms.unwrap_or_default(),
                candidate.host()
            );
        }
        outcome
    }

    /// Run [`RecoveryGuards::switch_to_main_if_on_proxy`] every `interval`
    /// until `shutdown` fires or its sender is dropped.
    pub async fn run_periodic(&self, interval: Duration, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        let mut ticks = IntervalStream::new(ticker);

        loop {
            tokio::select! {
                Some(_) = ticks.next() => {
                    let outcome = self.switch_to_main_if_on_proxy().await;
                    debug!("Recovery check: {:?}", outcome);
                }
                _ = &mut shutdown => {
                    info!("Recovery guard stopped");
                    break;
                }
            }
        }
    }
}
