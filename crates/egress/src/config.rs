//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::dns::{DEFAULT_DOH_ENDPOINT, DEFAULT_DOH_TIMEOUT};
use crate::executor::DEFAULT_TIMEOUT;
use crate::services::webhook::DEFAULT_USER_AGENT;

/// Egress configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// DNS-over-HTTPS JSON endpoint (default: Cloudflare).
    pub doh_endpoint: Url,

    /// Per-query DoH timeout (default: 5000ms).
    pub doh_timeout: Duration,

    /// Deadline for one-off fetches (default: 10000ms).
    pub fetch_timeout: Duration,

    /// Extra hostnames to reject, with their subdomains (comma-separated).
    pub restricted_hostnames: Vec<String>,

    /// Headers trusted to carry the client IP, in priority order
    /// (comma-separated, default: none).
    pub trusted_client_ip_headers: Vec<String>,

    /// User-Agent sent with webhook deliveries.
    pub webhook_user_agent: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let doh_endpoint = lookup("DOH_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_DOH_ENDPOINT.to_string());
        let doh_endpoint = Url::parse(&doh_endpoint).context("DOH_ENDPOINT must be a valid URL")?;
        if doh_endpoint.scheme() != "https" {
            anyhow::bail!("DOH_ENDPOINT must use https");
        }

        let doh_timeout = millis(&lookup, "DOH_TIMEOUT_MS", DEFAULT_DOH_TIMEOUT)?;
        let fetch_timeout = millis(&lookup, "FETCH_TIMEOUT_MS", DEFAULT_TIMEOUT)?;

        let restricted_hostnames = list(lookup("RESTRICTED_HOSTNAMES"));
        let trusted_client_ip_headers = list(lookup("TRUSTED_CLIENT_IP_HEADERS"))
            .into_iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();

        let webhook_user_agent =
            lookup("WEBHOOK_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Ok(Self {
            doh_endpoint,
            doh_timeout,
            fetch_timeout,
            restricted_hostnames,
            trusted_client_ip_headers,
            webhook_user_agent,
        })
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match lookup(key) {
        Some(value) => {
            let ms: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("{key} must be a number of milliseconds"))?;
            if ms == 0 {
                anyhow::bail!("{key} must be greater than zero");
            }
            Ok(Duration::from_millis(ms))
        }
        None => Ok(default),
    }
}

fn list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
