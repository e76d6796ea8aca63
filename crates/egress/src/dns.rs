//! Hostname resolution over DNS-over-HTTPS.
//!
//! A and AAAA are queried concurrently and both answers are required: if
//! either lookup fails the whole resolution fails, because dropping one
//! family could hide a private address served only over the other.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::DnsError;
use crate::net::{IpLiteral, parse_strict_v4, parse_strict_v6};

/// Default DoH endpoint (JSON API).
pub const DEFAULT_DOH_ENDPOINT: &str = "https://cloudflare-dns.com/dns-query";

/// Default per-query timeout.
pub const DEFAULT_DOH_TIMEOUT: Duration = Duration::from_millis(5000);

/// Largest DoH JSON reply read before the query is treated as failed.
pub const MAX_DOH_RESPONSE_BYTES: usize = 64 * 1024;

/// DNS response codes from the DoH JSON `Status` field.
const RCODE_NOERROR: i32 = 0;
const RCODE_NXDOMAIN: i32 = 3;

/// Resolves a hostname to every address it currently has.
///
/// Implementations return addresses in response order (A answers before
/// AAAA answers for DoH) and never return `Ok` with an empty list.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpLiteral>, DnsError>;
}

/// DNS record types queried by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Aaaa,
}

impl RecordType {
    fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }

    /// Numeric RR type used in DoH JSON answers.
    fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Aaaa => 28,
        }
    }

    fn parse(self, data: &str) -> Option<IpLiteral> {
        match self {
            RecordType::A => parse_strict_v4(data),
            RecordType::Aaaa => parse_strict_v6(data),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: i32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// Resolver backed by a DoH JSON endpoint (`application/dns-json`).
#[derive(Clone)]
pub struct DohResolver {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl DohResolver {
    /// Create a resolver for `endpoint` with a per-query timeout.
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Run a single query and return the matching addresses.
    ///
    /// NXDOMAIN yields an empty list; every other non-zero status is an
    /// upstream failure.
    pub async fn query(&self, host: &str, record: RecordType) -> Result<Vec<IpLiteral>, DnsError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("name", host)
            .append_pair("type", record.as_str());

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/dns-json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DnsError::upstream(host, e.to_string()))?;

        if !response.status().is_success() {
            return Err(DnsError::upstream(
                host,
                format!("{} query returned HTTP {}", record.as_str(), response.status()),
            ));
        }

        let raw = read_limited(response, host).await?;
        let body: DohResponse = serde_json::from_slice(&raw)
            .map_err(|e| DnsError::upstream(host, format!("malformed DoH response: {e}")))?;

        match body.status {
            RCODE_NOERROR => {}
            RCODE_NXDOMAIN => return Ok(Vec::new()),
            status => {
                return Err(DnsError::upstream(
                    host,
                    format!("{} query returned DNS status {status}", record.as_str()),
                ));
            }
        }

        // An answer we cannot parse strictly is a failure, not something to skip.
        body.answer
            .iter()
            .filter(|a| a.record_type == record.code())
            .map(|a| {
                record.parse(&a.data).ok_or_else(|| {
                    DnsError::upstream(host, format!("unparseable {} record: {}", record.as_str(), a.data))
                })
            })
            .collect()
    }
}

/// Read the reply body, failing once it grows past [`MAX_DOH_RESPONSE_BYTES`].
async fn read_limited(mut response: reqwest::Response, host: &str) -> Result<Vec<u8>, DnsError> {
    let too_large = || {
        DnsError::upstream(
            host,
            format!("DoH response exceeds {MAX_DOH_RESPONSE_BYTES} bytes"),
        )
    };

    if response
        .content_length()
        .is_some_and(|len| len > MAX_DOH_RESPONSE_BYTES as u64)
    {
        return Err(too_large());
    }

    let mut buf = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| DnsError::upstream(host, e.to_string()))?
    {
        if buf.len() + chunk.len() > MAX_DOH_RESPONSE_BYTES {
            return Err(too_large());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[async_trait]
impl Resolver for DohResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpLiteral>, DnsError> {
        let (v4, v6) = tokio::join!(
            self.query(host, RecordType::A),
            self.query(host, RecordType::Aaaa)
        );
        let mut addresses = v4?;
        addresses.extend(v6?);

        if addresses.is_empty() {
            return Err(DnsError::NoRecords {
                host: host.to_string(),
            });
        }

        debug!(host = %host, count = addresses.len(), "resolved hostname");
        Ok(addresses)
    }
}

impl std::fmt::Debug for DohResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohResolver")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn record_codes_match_rfc() {
        assert_eq!(RecordType::A.code(), 1);
        assert_eq!(RecordType::Aaaa.code(), 28);
    }

    #[test]
    fn doh_json_parses_with_and_without_answers() {
        let body: DohResponse = serde_json::from_str(
            r#"{"Status":0,"TC":false,"Answer":[{"name":"example.com","type":5,"TTL":60,"data":"cdn.example.net."},{"name":"cdn.example.net","type":1,"TTL":60,"data":"93.184.216.34"}]}"#,
        )
        .unwrap();
        assert_eq!(body.status, 0);
        assert_eq!(body.answer.len(), 2);
        assert_eq!(body.answer[1].record_type, 1);

        let empty: DohResponse = serde_json::from_str(r#"{"Status":3}"#).unwrap();
        assert_eq!(empty.status, 3);
        assert!(empty.answer.is_empty());
    }

    #[test]
    fn record_parsing_is_strict() {
        assert_eq!(RecordType::A.parse("1.2.3.4"), Some(IpLiteral::V4([1, 2, 3, 4])));
        assert_eq!(RecordType::A.parse("2001:db8::1"), None);
        assert!(RecordType::Aaaa.parse("2001:db8::1").is_some());
        assert_eq!(RecordType::Aaaa.parse("1.2.3.4"), None);
    }
}
