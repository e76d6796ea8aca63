//! Egress test utilities.
//!
//! Test doubles for integration tests: a table-driven resolver, a
//! transport that records what it was asked to send and replies from a
//! script, and a chunked response body that counts cancellations.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use egress::dns::Resolver;
use egress::error::{DnsError, ExecuteError};
use egress::executor::{PreparedRequest, ResponseBody, Transport, TransportResponse};
use egress::net::IpLiteral;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Parse an IP literal, panicking on invalid input.
pub fn ip(text: &str) -> IpLiteral {
    match text.parse() {
        Ok(ip) => ip,
        Err(e) => panic!("invalid IP literal in test: {e}"),
    }
}

/// Resolver answering from a fixed table. Unknown hosts have no records.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    answers: Arc<Mutex<HashMap<String, Result<Vec<IpLiteral>, DnsError>>>>,
    calls: Arc<AtomicUsize>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `host` with these addresses, in order.
    pub fn with(self, host: &str, addresses: &[&str]) -> Self {
        let addresses = addresses.iter().map(|a| ip(a)).collect();
        self.answers.lock().insert(host.to_string(), Ok(addresses));
        self
    }

    /// Fail lookups of `host` with `error`.
    pub fn with_error(self, host: &str, error: DnsError) -> Self {
        self.answers.lock().insert(host.to_string(), Err(error));
        self
    }

    /// Number of lookups made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpLiteral>, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answers.lock().get(host).cloned();
        answer.unwrap_or_else(|| {
            Err(DnsError::NoRecords {
                host: host.to_string(),
            })
        })
    }
}

/// A scripted HTTP response.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            chunk_size: 0,
            chunk_delay: None,
        }
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Serve the body in chunks of this many bytes (0: one chunk).
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sleep before serving each chunk.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

/// What the transport does with the next request.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(Reply),
    NetworkError(String),
    /// Never answer.
    Hang,
}

/// Transport that records requests and replies from a script.
///
/// Scripted entries are consumed in order; once the script is empty every
/// request gets the default entry (`200` with an empty body unless set).
#[derive(Clone, Default)]
pub struct RecordingTransport {
    requests: Arc<Mutex<Vec<PreparedRequest>>>,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Arc<Mutex<Option<Scripted>>>,
    cancels: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to every request with `reply`.
    pub fn replying(reply: Reply) -> Self {
        let transport = Self::new();
        *transport.fallback.lock() = Some(Scripted::Reply(reply));
        transport
    }

    /// Queue `scripted` for the next request.
    pub fn then(self, scripted: Scripted) -> Self {
        self.script.lock().push_back(scripted);
        self
    }

    /// Use `scripted` whenever the script is empty.
    pub fn otherwise(self, scripted: Scripted) -> Self {
        *self.fallback.lock() = Some(scripted);
        self
    }

    /// Every request sent so far.
    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<PreparedRequest> {
        self.requests.lock().last().cloned()
    }

    /// Total `cancel()` calls across all bodies served.
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, ExecuteError> {
        self.requests.lock().push(request);

        let next = self.script.lock().pop_front();
        let next = next
            .or_else(|| self.fallback.lock().clone())
            .unwrap_or_else(|| Scripted::Reply(Reply::status(200)));

        let reply = match next {
            Scripted::Reply(reply) => reply,
            Scripted::NetworkError(message) => return Err(ExecuteError::Network(message)),
            Scripted::Hang => {
                return std::future::pending::<Result<TransportResponse, ExecuteError>>().await;
            }
        };

        let status = match StatusCode::from_u16(reply.status) {
            Ok(status) => status,
            Err(e) => panic!("invalid scripted status {}: {e}", reply.status),
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &reply.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => panic!("invalid scripted header {name}: {value}"),
            }
        }

        let mut body = ChunkedBody::new(&reply.body, reply.chunk_size)
            .counting_cancels(Arc::clone(&self.cancels));
        if let Some(delay) = reply.chunk_delay {
            body = body.with_delay(delay);
        }

        Ok(TransportResponse {
            status,
            headers,
            body: Box::new(body),
        })
    }
}

/// A response body served in fixed-size chunks.
pub struct ChunkedBody {
    chunks: VecDeque<Vec<u8>>,
    delay: Option<Duration>,
    cancels: Arc<AtomicUsize>,
}

impl ChunkedBody {
    pub fn new(body: &[u8], chunk_size: usize) -> Self {
        let size = if chunk_size == 0 {
            body.len().max(1)
        } else {
            chunk_size
        };
        Self {
            chunks: body.chunks(size).map(<[u8]>::to_vec).collect(),
            delay: None,
            cancels: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Count `cancel()` calls in `counter`.
    pub fn counting_cancels(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.cancels = counter;
        self
    }
}

#[async_trait]
impl ResponseBody for ChunkedBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ExecuteError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.chunks.pop_front())
    }

    fn cancel(&mut self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.chunks.clear();
    }
}
