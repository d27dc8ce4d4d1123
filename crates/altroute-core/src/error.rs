//! Error types for the altroute failover engine
//!
//! Per-candidate and per-provider errors are converted to "try next" by the
//! engine. Only [`Error::Config`] aborts a whole resolution cycle.

use thiserror::Error;

/// Result type alias for altroute operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the failover engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (empty provider list, malformed URL, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to a backend or DoH provider
    #[error("Network error: {0}")]
    Network(String),

    /// An attempt exceeded its time budget
    #[error("Timed out after {secs}s: {what}")]
    Timeout {
        /// What was being attempted
        what: String,
        /// Budget that was exceeded
        secs: u64,
    },

    /// The server's leaf certificate public key is not in the allow-list
    #[error("Certificate pin mismatch for {host}")]
    PinningViolation {
        /// Host whose certificate was rejected
        host: String,
    },

    /// TLS configuration could not be built
    #[error("TLS error: {0}")]
    Tls(String),

    /// Malformed or unusable DNS message
    #[error("DNS error: {0}")]
    Dns(String),

    /// DoH provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Registry store errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            secs,
        }
    }

    /// Create a pinning violation for `host`
    pub fn pinning_violation(host: impl Into<String>) -> Self {
        Self::PinningViolation { host: host.into() }
    }

    /// Create a TLS configuration error
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a DNS message error
    pub fn dns(msg: impl Into<String>) -> Self {
        Self::Dns(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Timeouts and I/O failures: handled by moving on to the next
    /// candidate or provider, never surfaced directly.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. } | Self::Io(_))
    }

    /// Errors that abort a whole resolution cycle
    pub fn is_fatal_to_cycle(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
