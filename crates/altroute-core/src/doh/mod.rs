//! Alternative hostname discovery over DNS-over-HTTPS
//!
//! Providers are independent operators queried strictly in order. The first
//! one to return a non-empty, usable answer wins and later providers are
//! never contacted. A provider that errors, times out or answers nothing is
//! skipped; resolution only fails when every provider did so.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::normalize_base_url;
use crate::error::{Error, Result};
use crate::traits::DohProvider;

/// Resolves candidate base URLs from a fixed TXT record
pub struct DohResolver {
    providers: Vec<Arc<dyn DohProvider>>,
    txt_record: String,
    timeout: Duration,
}

impl DohResolver {
    /// Create a resolver
    ///
    /// An empty provider list is a configuration error.
    pub fn new(
        providers: Vec<Box<dyn DohProvider>>,
        txt_record: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(Error::config("No DoH providers configured"));
        }
        let txt_record = txt_record.into();
        if txt_record.trim().is_empty() {
            return Err(Error::config("DoH TXT record name cannot be empty"));
        }

        Ok(Self {
            providers: providers.into_iter().map(Arc::from).collect(),
            txt_record,
            timeout,
        })
    }

    /// TXT record being queried
    pub fn txt_record(&self) -> &str {
        &self.txt_record
    }

    /// Number of configured providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Query providers in order and return `https://<text>/` for every TXT
    /// value of the first provider with a usable answer.
    pub async fn resolve_alternatives(&self) -> Result<Vec<String>> {
        for provider in &self.providers {
            let name = provider.provider_name();

            match tokio::time::timeout(self.timeout, provider.query_txt(&self.txt_record)).await {
                Ok(Ok(texts)) => {
                    let hosts = texts_to_base_urls(&texts);
                    if hosts.is_empty() {
                        debug!("DoH provider {} returned no usable hostnames", name);
                        continue;
                    }
                    info!("DoH provider {} returned {} alternative(s)", name, hosts.len());
                    return Ok(hosts);
                }
                Ok(Err(e)) => {
                    warn!("DoH provider {} failed: {}", name, e);
                }
                Err(_) => {
                    warn!(
                        "DoH provider {} timed out after {:?}",
                        name, self.timeout
                    );
                }
            }
        }

        Err(Error::provider(
            "doh",
            format!(
                "none of {} provider(s) returned alternatives for {}",
                self.providers.len(),
                self.txt_record
            ),
        ))
    }
}

/// Map TXT values to normalized base URLs, dropping blanks, values that are
/// not a bare hostname, and duplicates. Order is preserved.
pub fn texts_to_base_urls(texts: &[String]) -> Vec<String> {
    let mut urls: Vec<String> = Vec::with_capacity(texts.len());
    for text in texts {
        let host = text.trim().trim_end_matches('.');
        if host.is_empty() || host.contains(['/', ' ', '@', '?', '#']) {
            if !host.is_empty() {
                debug!("Ignoring TXT value that is not a hostname: {:?}", text);
            }
            continue;
        }
        match normalize_base_url(&format!("https://{}/", host)) {
            Ok(url) if !urls.contains(&url) => urls.push(url),
            Ok(_) => {}
            Err(e) => debug!("Ignoring TXT value {:?}: {}", text, e),
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn texts_map_to_https_base_urls() {
        assert_eq!(
            texts_to_base_urls(&texts(&["a.example.net", " b.example.net. "])),
            vec!["https://a.example.net/", "https://b.example.net/"]
        );
    }

    #[test]
    fn duplicates_and_junk_are_dropped() {
        assert_eq!(
            texts_to_base_urls(&texts(&[
                "a.example.net",
                "",
                "v=spf1 include:x",
                "A.example.net",
                "https://evil/",
                "a.example.net",
            ])),
            vec!["https://a.example.net/"]
        );
    }

    #[test]
    fn empty_provider_list_is_rejected() {
        let result = DohResolver::new(Vec::new(), "alt.example.com", Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
