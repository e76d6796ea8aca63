//! Outbound requests against validated destinations.
//!
//! The executor only accepts a [`ResolvedDestination`], so every request it
//! makes has passed the resolving validator. For `http` the request is
//! dialed at the resolved address itself, which closes the window between
//! validation and connection. For `https` the original hostname is kept so
//! the certificate can be checked against it.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HOST, HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Method, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::ExecuteError;
use crate::validate::{ResolvedDestination, Scheme};

/// Default hard deadline for a request, body included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// What the caller wants to send. The destination comes separately.
#[derive(Debug, Clone, Default)]
pub struct OutboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Method::POST,
            headers: HeaderMap::new(),
            body: Some(body.into()),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A request as it goes on the wire: URL already rewritten, `Host` set.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// Per-request deadline and cancellation.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn cancel_with(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

/// Sends prepared requests. Implementations must not follow redirects.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, ExecuteError>;
}

/// Status line and headers, with the body still unread.
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Box<dyn ResponseBody>,
}

/// An incrementally readable response body.
#[async_trait]
pub trait ResponseBody: Send {
    /// The next chunk, or `None` once the body is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ExecuteError>;

    /// Stop reading and release the underlying stream.
    fn cancel(&mut self);
}

/// [`Transport`] backed by a reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            // A redirect target would skip validation entirely.
            .redirect(reqwest::redirect::Policy::none())
            // A proxy would do its own resolution of the original host.
            .no_proxy()
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, ExecuteError> {
        let PreparedRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(ExecuteError::network)?;

        Ok(TransportResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: Box::new(ReqwestBody {
                response: Some(response),
            }),
        })
    }
}

struct ReqwestBody {
    response: Option<reqwest::Response>,
}

#[async_trait]
impl ResponseBody for ReqwestBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ExecuteError> {
        let Some(response) = self.response.as_mut() else {
            return Ok(None);
        };

        match response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk.to_vec())),
            Ok(None) => {
                self.response = None;
                Ok(None)
            }
            Err(e) => Err(ExecuteError::network(e)),
        }
    }

    fn cancel(&mut self) {
        // Dropping the response closes the connection's body stream.
        self.response.take();
    }
}

/// Bind a request to its validated destination.
///
/// `http`: the URL host becomes the resolved address and `Host` carries the
/// original `host[:port]`. `https`: the URL is left alone and any
/// caller-supplied `Host` is removed.
pub fn prepare(
    destination: ResolvedDestination,
    request: OutboundRequest,
) -> Result<PreparedRequest, ExecuteError> {
    let (mut url, scheme, ip) = destination.into_parts();
    let OutboundRequest {
        method,
        mut headers,
        body,
    } = request;

    match scheme {
        Scheme::Http => {
            let host_header = match url.host() {
                Some(url::Host::Domain(host)) => Some(match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                }),
                _ => None,
            };

            if let Some(host_header) = host_header {
                let value = HeaderValue::from_str(&host_header)
                    .map_err(|e| ExecuteError::Request(format!("invalid Host header: {e}")))?;
                url.set_ip_host(IpAddr::from(ip)).map_err(|()| {
                    ExecuteError::Request(format!("cannot rewrite URL host to {ip}"))
                })?;
                headers.insert(HOST, value);
            } else {
                headers.remove(HOST);
            }
        }
        Scheme::Https => {
            headers.remove(HOST);
        }
    }

    Ok(PreparedRequest {
        method,
        url,
        headers,
        body,
    })
}

/// Issues requests to validated destinations with a hard deadline.
#[derive(Clone)]
pub struct SafeRequestExecutor {
    transport: Arc<dyn Transport>,
}

impl SafeRequestExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Executor over a fresh [`ReqwestTransport`].
    pub fn reqwest() -> Result<Self, reqwest::Error> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?)))
    }

    /// Send `request` to `destination`.
    ///
    /// The deadline in `options` covers the whole exchange, including body
    /// reads through the returned [`SafeResponse`]. Expiry yields
    /// [`ExecuteError::Timeout`]; the caller's token yields
    /// [`ExecuteError::Cancelled`]. A 3xx response is never followed and is
    /// returned as [`ExecuteError::Redirect`].
    pub async fn execute(
        &self,
        destination: ResolvedDestination,
        request: OutboundRequest,
        options: RequestOptions,
    ) -> Result<SafeResponse, ExecuteError> {
        let RequestOptions { timeout, cancel } = options;
        let deadline = Instant::now() + timeout;

        let prepared = prepare(destination, request)?;
        debug!(method = %prepared.method, url = %prepared.url, "sending request");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ExecuteError::Cancelled),
            result = tokio::time::timeout_at(deadline, self.transport.send(prepared)) => match result {
                Ok(response) => response?,
                Err(_) => return Err(ExecuteError::Timeout { after: timeout }),
            },
        };

        let TransportResponse {
            status,
            headers,
            mut body,
        } = response;

        if status.is_redirection() {
            body.cancel();
            let location = headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            warn!(status = status.as_u16(), location = ?location, "refusing to follow redirect");
            return Err(ExecuteError::Redirect {
                status: status.as_u16(),
                location,
            });
        }

        Ok(SafeResponse {
            status,
            headers,
            body,
            deadline,
            timeout,
            cancel,
            finished: false,
        })
    }
}

impl std::fmt::Debug for SafeRequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeRequestExecutor").finish_non_exhaustive()
    }
}

/// A non-redirect response whose body is read under the request's deadline.
pub struct SafeResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Box<dyn ResponseBody>,
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
    finished: bool,
}

enum Fill {
    Exhausted,
    Capped,
}

impl SafeResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Append at most `cap` bytes of the body to `buf`.
    ///
    /// Once the cap is reached the stream is cancelled instead of drained.
    /// On error `buf` keeps whatever was read before the failure. The body
    /// is read at most once; later calls return immediately.
    pub async fn read_capped(&mut self, cap: usize, buf: &mut Vec<u8>) -> Result<(), ExecuteError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let limit = buf.len().saturating_add(cap);
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ExecuteError::Cancelled),
            result = tokio::time::timeout_at(self.deadline, fill_capped(self.body.as_mut(), limit, buf)) => {
                result.unwrap_or(Err(ExecuteError::Timeout { after: self.timeout }))
            }
        };

        match result {
            Ok(Fill::Exhausted) => Ok(()),
            Ok(Fill::Capped) => {
                debug!(cap, "response body capped");
                self.body.cancel();
                Ok(())
            }
            Err(e) => {
                self.body.cancel();
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SafeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn fill_capped(
    body: &mut dyn ResponseBody,
    limit: usize,
    buf: &mut Vec<u8>,
) -> Result<Fill, ExecuteError> {
    while buf.len() < limit {
        let Some(chunk) = body.next_chunk().await? else {
            return Ok(Fill::Exhausted);
        };
        let take = chunk.len().min(limit - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }
    Ok(Fill::Capped)
}
