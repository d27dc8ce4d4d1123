//! HTTP reachability probe
//!
//! Issues one `GET <base>/<probe_path>` through the candidate's own client,
//! so a pinning failure shows up exactly as it would for real traffic.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::BackendProber;
use crate::transport::ApiClient;
use crate::transport::pinning::is_certificate_rejection;

/// Probe that expects a 2xx answer on a lightweight endpoint
#[derive(Debug, Clone)]
pub struct HttpBackendProber {
    path: String,
}

impl HttpBackendProber {
    /// Create a prober for `path` (relative to each client's base URL)
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for HttpBackendProber {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PROBE_PATH)
    }
}

#[async_trait]
impl BackendProber for HttpBackendProber {
    async fn probe(&self, client: &ApiClient) -> Result<()> {
        let url = client.url(&self.path);
        debug!("Probing {}", url);

        let response = client
            .http()
            .get(&url)
            .timeout(client.timeout())
            .send()
            .await
            .map_err(|e| classify(client, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::network(format!(
                "{} answered {}",
                url,
                response.status()
            )))
        }
    }
}

fn classify(client: &ApiClient, err: reqwest::Error) -> Error {
    if client.policy().is_explicit() && is_certificate_rejection(&err) {
        let host = err
            .url()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| client.base_url().to_string());
        return Error::pinning_violation(host);
    }
    if err.is_timeout() {
        return Error::timeout(client.url(""), client.timeout().as_secs());
    }
    Error::network(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_ping_endpoint() {
        let prober = HttpBackendProber::default();
        assert_eq!(prober.path, "tests/ping");
    }
}
