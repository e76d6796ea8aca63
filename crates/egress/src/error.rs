//! Error types.
//!
//! Validation errors are raised before any network call; execution errors
//! come from the request itself. Each error maps onto a flat [`ErrorKind`]
//! for callers that only need to branch on the reason.

use std::time::Duration;

use thiserror::Error;

use crate::net::IpLiteral;

/// Why DNS resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsFailureKind {
    NoRecords,
    UpstreamFailure,
}

/// Flat error taxonomy shared by validation and execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    PrivateAddress,
    AmbiguousAddress,
    RestrictedHostname,
    DnsResolutionFailure(DnsFailureKind),
    RebindingDetected,
    Timeout,
    Cancelled,
    NetworkError,
    HttpError(u16),
}

/// DNS resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("could not resolve hostname: {host}")]
    NoRecords { host: String },

    #[error("DNS lookup for {host} failed: {message}")]
    Upstream { host: String, message: String },
}

impl DnsError {
    pub(crate) fn upstream(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> DnsFailureKind {
        match self {
            DnsError::NoRecords { .. } => DnsFailureKind::NoRecords,
            DnsError::Upstream { .. } => DnsFailureKind::UpstreamFailure,
        }
    }
}

/// A destination was rejected before any request was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme: {scheme} (must be http or https)")]
    UnsupportedScheme { scheme: String },

    #[error("private IP addresses are not allowed: {ip}")]
    PrivateAddress { ip: IpLiteral },

    #[error("ambiguous or non-standard IP address is not allowed: {host}")]
    AmbiguousAddress { host: String },

    #[error("restricted hostname: {host}")]
    RestrictedHostname { host: String },

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error("domain {host} resolves to private IP address: {ip}")]
    RebindingDetected { host: String, ip: IpLiteral },
}

impl ValidationError {
    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            ValidationError::UnsupportedScheme { .. } => ErrorKind::UnsupportedScheme,
            ValidationError::PrivateAddress { .. } => ErrorKind::PrivateAddress,
            ValidationError::AmbiguousAddress { .. } => ErrorKind::AmbiguousAddress,
            ValidationError::RestrictedHostname { .. } => ErrorKind::RestrictedHostname,
            ValidationError::Dns(e) => ErrorKind::DnsResolutionFailure(e.kind()),
            ValidationError::RebindingDetected { .. } => ErrorKind::RebindingDetected,
        }
    }
}

/// An outbound request failed after validation succeeded.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The request's own deadline expired.
    #[error("request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// The caller cancelled the request.
    #[error("request was cancelled")]
    Cancelled,

    #[error("{0}")]
    Network(String),

    /// The request could not be built (bad header value, unrewritable URL).
    #[error("invalid request: {0}")]
    Request(String),

    /// The destination answered with a redirect, which is never followed.
    #[error("HTTP {status}: redirect{} refused", redirect_target(.location))]
    Redirect {
        status: u16,
        location: Option<String>,
    },
}

impl ExecuteError {
    pub(crate) fn network(e: impl std::fmt::Display) -> Self {
        Self::Network(e.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecuteError::Timeout { .. } => ErrorKind::Timeout,
            ExecuteError::Cancelled => ErrorKind::Cancelled,
            ExecuteError::Network(_) | ExecuteError::Request(_) => ErrorKind::NetworkError,
            ExecuteError::Redirect { status, .. } => ErrorKind::HttpError(*status),
        }
    }
}

fn redirect_target(location: &Option<String>) -> String {
    location
        .as_deref()
        .map(|l| format!(" to {l}"))
        .unwrap_or_default()
}

/// Error from a one-off safe fetch: either the destination was rejected or
/// the request failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Rejected(#[from] ValidationError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Rejected(e) => e.kind(),
            FetchError::Execute(e) => e.kind(),
        }
    }
}
