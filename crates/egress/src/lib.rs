//! Egress
//!
//! SSRF-safe outbound requests: strict IP literal parsing, private range
//! matching, DNS-over-HTTPS resolution, destination validation, request
//! execution pinned to the validated address, and signed webhook delivery.
//! The `egress` binary wraps these for manual checks.

pub mod config;
pub mod dns;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod net;
pub mod services;
pub mod validate;

pub use dns::{DohResolver, Resolver};
pub use error::{DnsError, DnsFailureKind, ErrorKind, ExecuteError, FetchError, ValidationError};
pub use executor::{
    OutboundRequest, PreparedRequest, RequestOptions, ResponseBody, SafeRequestExecutor,
    SafeResponse, Transport, TransportResponse,
};
pub use fetch::SafeFetcher;
pub use net::IpLiteral;
pub use validate::{CheckedHost, CheckedUrl, ResolvedDestination, Scheme, Validator, validate_syntax};
