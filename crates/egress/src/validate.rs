//! Destination validation (SSRF prevention).
//!
//! Two checks: [`validate_syntax`] looks only at the URL text, and
//! [`Validator::validate_resolved`] additionally resolves the hostname and
//! vets every answer. Only the resolving check produces a
//! [`ResolvedDestination`], which is the sole input the executor accepts.

use std::sync::Arc;

use tracing::{debug, warn};
use url::{Host, Url};

use crate::dns::Resolver;
use crate::error::{DnsError, ValidationError};
use crate::net::{AddressClass, IpLiteral, classify, is_ambiguous};

/// Hostnames that are always rejected, whatever they resolve to.
pub const RESTRICTED_HOSTNAMES: &[&str] = &[
    "localhost",
    "169.254.169.254",
    "metadata.google.internal",
    "metadata.goog",
];

/// Hostname suffixes that are always rejected.
pub const RESTRICTED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// The host of a URL that passed the syntax check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckedHost {
    /// A strict, public IP literal. Needs no resolution.
    Ip(IpLiteral),
    /// A hostname that must still be resolved and re-checked.
    Domain(String),
}

/// A URL that passed [`validate_syntax`].
#[derive(Debug, Clone)]
pub struct CheckedUrl {
    url: Url,
    scheme: Scheme,
    host: CheckedHost,
}

impl CheckedUrl {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &CheckedHost {
        &self.host
    }
}

/// A validated destination bound to the address that must be dialed.
///
/// Only the validator can build one, and the executor consumes it by value.
#[derive(Debug)]
pub struct ResolvedDestination {
    original_url: Url,
    scheme: Scheme,
    resolved_ip: IpLiteral,
}

impl ResolvedDestination {
    pub(crate) fn new(original_url: Url, scheme: Scheme, resolved_ip: IpLiteral) -> Self {
        Self {
            original_url,
            scheme,
            resolved_ip,
        }
    }

    pub fn original_url(&self) -> &Url {
        &self.original_url
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn resolved_ip(&self) -> IpLiteral {
        self.resolved_ip
    }

    /// Whether the resolved address must be bracketed in a URL (IPv6).
    pub fn is_bracketed(&self) -> bool {
        self.resolved_ip.is_v6()
    }

    /// The resolved address as it appears in a URL authority.
    pub fn ip_host(&self) -> String {
        self.resolved_ip.url_host()
    }

    pub(crate) fn into_parts(self) -> (Url, Scheme, IpLiteral) {
        (self.original_url, self.scheme, self.resolved_ip)
    }
}

/// Check a URL without resolving it.
///
/// Rejects unparseable URLs, non-http(s) schemes, private and ambiguous IP
/// hosts, and restricted hostnames. A public IP host comes back as
/// [`CheckedHost::Ip`]; anything else as [`CheckedHost::Domain`].
pub fn validate_syntax(url: &str) -> Result<CheckedUrl, ValidationError> {
    let parsed = Url::parse(url).map_err(|e| ValidationError::invalid_url(url, e.to_string()))?;

    let scheme = match parsed.scheme() {
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        other => {
            return Err(ValidationError::UnsupportedScheme {
                scheme: other.to_string(),
            });
        }
    };

    let Some(host_str) = parsed.host_str() else {
        return Err(ValidationError::invalid_url(url, "URL has no host"));
    };

    // The URL parser rewrites octal, hex, integer and percent-encoded IPv4
    // hosts into dotted quads, so the host as written has to be checked as
    // well. An IPv4 host is only accepted when it was written that way.
    let raw = raw_host(url);
    if let Some(raw) = raw.as_deref()
        && is_ambiguous(raw)
    {
        return Err(ValidationError::AmbiguousAddress {
            host: raw.to_string(),
        });
    }
    if let Some(Host::Ipv4(addr)) = parsed.host() {
        let canonical = addr.to_string();
        if raw.as_deref() != Some(canonical.as_str()) {
            return Err(ValidationError::AmbiguousAddress {
                host: raw.unwrap_or(canonical),
            });
        }
    }

    let host = strip_brackets(host_str);
    let checked_host = match classify(host) {
        AddressClass::Private(ip) => return Err(ValidationError::PrivateAddress { ip }),
        AddressClass::Ambiguous => {
            return Err(ValidationError::AmbiguousAddress {
                host: host.to_string(),
            });
        }
        AddressClass::Public(ip) => CheckedHost::Ip(ip),
        AddressClass::Hostname => CheckedHost::Domain(host.to_string()),
    };

    if is_restricted(host, &[]) {
        return Err(ValidationError::RestrictedHostname {
            host: host.to_string(),
        });
    }

    let url = parsed;
    Ok(CheckedUrl {
        url,
        scheme,
        host: checked_host,
    })
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// The host as written in the input, after the clean-up the URL parser does
/// before it splits the authority. Percent-encoding is left in place.
fn raw_host(input: &str) -> Option<String> {
    let cleaned: String = input
        .trim_matches(|c: char| c <= ' ')
        .chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
        .collect();
    let (_, rest) = cleaned.split_once(':')?;
    let rest = rest.trim_start_matches(['/', '\\']);
    let end = rest.find(['/', '?', '#', '\\']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    let host = match host_port.strip_prefix('[') {
        Some(bracketed) => bracketed.split_once(']').map(|(host, _)| host)?,
        None => host_port.split_once(':').map_or(host_port, |(host, _)| host),
    };
    Some(host.to_string())
}

fn is_restricted(host: &str, extra: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    RESTRICTED_HOSTNAMES.contains(&host.as_str())
        || RESTRICTED_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
        || extra.iter().any(|blocked| {
            host == *blocked
                || host
                    .strip_suffix(blocked.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
}

/// Validates destinations and resolves hostnames through a [`Resolver`].
#[derive(Clone)]
pub struct Validator {
    resolver: Arc<dyn Resolver>,
    restricted: Arc<[String]>,
}

impl Validator {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            restricted: Arc::from(Vec::new()),
        }
    }

    /// Reject these hostnames (and their subdomains) in addition to the
    /// built-in list.
    pub fn with_restricted_hostnames<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts: Vec<String> = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self.restricted = Arc::from(hosts);
        self
    }

    /// [`validate_syntax`] plus the configured restricted hostnames.
    pub fn validate_syntax(&self, url: &str) -> Result<CheckedUrl, ValidationError> {
        let checked = validate_syntax(url)?;

        let host = strip_brackets(checked.url.host_str().unwrap_or_default());
        if is_restricted(host, &self.restricted) {
            return Err(ValidationError::RestrictedHostname {
                host: host.to_string(),
            });
        }

        Ok(checked)
    }

    /// Check a URL and resolve it to the address that must be dialed.
    ///
    /// Every DNS answer is checked, not just the one that will be used: a
    /// resolver that returns a public address first and a private one second
    /// is rejected with [`ValidationError::RebindingDetected`]. Only when all
    /// answers pass is the first one selected.
    pub async fn validate_resolved(&self, url: &str) -> Result<ResolvedDestination, ValidationError> {
        let checked = self.validate_syntax(url)?;
        let CheckedUrl { url, scheme, host } = checked;

        let host = match host {
            CheckedHost::Ip(ip) => return Ok(ResolvedDestination::new(url, scheme, ip)),
            CheckedHost::Domain(host) => host,
        };

        let answers = self.resolver.resolve(&host).await?;

        let private: Vec<IpLiteral> = answers.iter().copied().filter(IpLiteral::is_private).collect();
        if let Some(&ip) = private.first() {
            warn!(
                host = %host,
                answers = answers.len(),
                private = ?private,
                "hostname resolves to private address"
            );
            return Err(ValidationError::RebindingDetected { host, ip });
        }

        let Some(&ip) = answers.first() else {
            return Err(DnsError::NoRecords { host }.into());
        };

        debug!(host = %host, ip = %ip, "destination validated");
        Ok(ResolvedDestination::new(url, scheme, ip))
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("restricted", &self.restricted)
            .finish()
    }
}
