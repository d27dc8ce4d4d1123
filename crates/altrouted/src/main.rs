// # altrouted - alternative routing daemon
//
// Thin integration layer around altroute-core:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering DoH providers
// 4. Resolving once at startup if the main backend is unreachable
// 5. Running the recovery guard until SIGINT/SIGTERM
//
// ## Configuration
//
// ### Backends
// - `ALTROUTE_MAIN_URL`: Main backend base URL (required)
// - `ALTROUTE_MAIN_PINS`: Comma-separated extra SPKI pins for the main backend
// - `ALTROUTE_PROXY_PINS`: Comma-separated SPKI pins for alternative routes (required)
//
// ### DoH
// - `ALTROUTE_TXT_RECORD`: TXT record listing alternative hostnames (required)
// - `ALTROUTE_DOH_PROVIDERS`: Comma-separated RFC 8484 endpoints, in query order
//
// ### Behavior
// - `ALTROUTE_TIMEOUT_SECS`: Per-attempt timeout (default 20)
// - `ALTROUTE_ALLOW_ALT_ROUTING`: `true`/`false` (default true)
// - `ALTROUTE_RECOVERY_INTERVAL_SECS`: Recovery guard interval (default 300)
//
// ### State
// - `ALTROUTE_STATE_PATH`: Registry snapshot file (memory store if unset)
// - `ALTROUTE_SESSION`: Snapshot key (default "default")
//
// ### Logging
// - `ALTROUTE_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export ALTROUTE_MAIN_URL=https://api.example.com/
// export ALTROUTE_PROXY_PINS=base64pin1=,base64pin2=
// export ALTROUTE_TXT_RECORD=alt.example.com
// export ALTROUTE_STATE_PATH=/var/lib/altroute/registry.json
//
// altrouted
// ```

use altroute_core::traits::{AlwaysPlausible, StaticPreference};
use altroute_core::{
    AltRouteConfig, DohProviderConfig, DohResolver, FailoverEvent, FailoverOrchestrator,
    HttpBackendProber, ProviderRegistry, ProxyHealthStore, RecoveryOutcome, ResolutionOutcome,
    StateStoreConfig,
};
use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum AltrouteExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<AltrouteExitCode> for ExitCode {
    fn from(code: AltrouteExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
struct Config {
    engine: AltRouteConfig,
    log_level: Level,
}

impl Config {
    /// Load and validate configuration from environment variables
    fn from_env() -> Result<Self> {
        let main_url = env::var("ALTROUTE_MAIN_URL").context("ALTROUTE_MAIN_URL is required")?;
        let txt_record =
            env::var("ALTROUTE_TXT_RECORD").context("ALTROUTE_TXT_RECORD is required")?;
        let proxy_pins = list_var("ALTROUTE_PROXY_PINS");
        if proxy_pins.is_empty() {
            anyhow::bail!(
                "ALTROUTE_PROXY_PINS must list at least one SPKI pin. \
                Set it via: export ALTROUTE_PROXY_PINS=pin1,pin2"
            );
        }

        let mut engine = AltRouteConfig::new(main_url, txt_record, proxy_pins);
        engine.main_key_hashes = list_var("ALTROUTE_MAIN_PINS");

        let providers = list_var("ALTROUTE_DOH_PROVIDERS");
        if !providers.is_empty() {
            engine.doh.providers = providers.into_iter().map(DohProviderConfig::https).collect();
        }

        if let Some(secs) = parse_var::<u64>("ALTROUTE_TIMEOUT_SECS")? {
            engine.attempt_timeout_secs = secs;
        }
        if let Some(allow) = parse_var::<bool>("ALTROUTE_ALLOW_ALT_ROUTING")? {
            engine.allow_alternative_routing = allow;
        }
        if let Some(secs) = parse_var::<u64>("ALTROUTE_RECOVERY_INTERVAL_SECS")? {
            if !(10..=86_400).contains(&secs) {
                anyhow::bail!(
                    "ALTROUTE_RECOVERY_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                    secs
                );
            }
            engine.recovery_interval_secs = secs;
        }
        if let Ok(path) = env::var("ALTROUTE_STATE_PATH")
            && !path.is_empty()
        {
            engine.state_store = StateStoreConfig::File { path };
        }
        if let Ok(session) = env::var("ALTROUTE_SESSION") {
            engine.session_id = session;
        }

        engine.validate()?;

        let log_level = match env::var("ALTROUTE_LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            other => anyhow::bail!(
                "ALTROUTE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                other
            ),
        };

        Ok(Self { engine, log_level })
    }
}

/// Comma-separated list variable, empty if unset
fn list_var(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Optional typed variable; present but unparseable is an error
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return AltrouteExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return AltrouteExitCode::ConfigError.into();
    }

    info!("Starting altrouted daemon");
    info!(
        "Main backend {}, {} DoH provider(s)",
        config.engine.main_base_url,
        config.engine.doh.providers.len()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return AltrouteExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(config.engine).await {
            Ok(()) => AltrouteExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                AltrouteExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Run the daemon
async fn run_daemon(config: AltRouteConfig) -> Result<()> {
    let registry = ProviderRegistry::new();
    altroute_doh::register_with_timeout(&registry, config.attempt_timeout());

    let providers = registry.create_doh_providers(&config.doh)?;
    let resolver = DohResolver::new(
        providers,
        config.doh.txt_record.clone(),
        config.attempt_timeout(),
    )?;

    let store = altroute_core::state::open_store(&config.state_store).await?;
    let health = Arc::new(ProxyHealthStore::open(store, config.session_id.clone()).await);

    let (orchestrator, events) = FailoverOrchestrator::new(
        &config,
        resolver,
        Arc::clone(&health),
        Arc::new(HttpBackendProber::new(config.probe_path.clone())),
        Arc::new(AlwaysPlausible),
        Arc::new(StaticPreference::new(config.allow_alternative_routing)),
    )?;
    let guards = orchestrator.recovery_guards();

    let event_logger = tokio::spawn(log_events(events));

    if guards.switch_to_main_if_available().await == RecoveryOutcome::MainUnavailable {
        warn!("Main backend unreachable at startup");
        if orchestrator.resume().await.is_none() {
            match orchestrator.trigger_resolution().await {
                ResolutionOutcome::SwitchedToProxy(candidate) => {
                    info!("Routing through {}", candidate.host())
                }
                outcome => info!("Startup resolution finished: {:?}", outcome),
            }
        }
    } else {
        info!("Main backend reachable");
    }

    let (stop_tx, stop_rx) = oneshot::channel();
    let interval = Duration::from_secs(config.recovery_interval_secs);
    let recovery = tokio::spawn(async move { guards.run_periodic(interval, stop_rx).await });

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);

    // receiver gone means the guard already stopped
    let _ = stop_tx.send(());
    recovery.await.context("Recovery guard task failed")?;
    event_logger.abort();

    health.flush().await?;
    info!("State flushed, daemon stopped");
    Ok(())
}

async fn log_events(mut events: mpsc::Receiver<FailoverEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            FailoverEvent::ResolutionStarted => info!("Checking alternative routes"),
            FailoverEvent::ResolutionFinished { backend } => info!("Using backend {}", backend),
            FailoverEvent::ResolutionFailed { attempts } => {
                warn!("Could not reach server ({} route(s) tried)", attempts.len());
                for attempt in attempts {
                    warn!("  {}: {}", attempt.base_url, attempt.reason);
                }
            }
            FailoverEvent::SwitchedToMain { dwell_ms } => match dwell_ms {
                Some(ms) => info!("Back on main backend after {} ms on a proxy", ms),
                None => info!("Back on main backend"),
            },
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
