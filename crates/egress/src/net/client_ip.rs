//! Client address extraction from proxy-set request headers.
//!
//! A forwarding header is only as trustworthy as the edge that sets it: if
//! the edge does not overwrite a header, the client controls it. The list
//! of trusted headers is therefore explicit configuration and empty by
//! default, which means "trust nothing".

use std::net::IpAddr;

use reqwest::header::HeaderMap;
use tracing::debug;

/// Priority order for deployments behind Cloudflare, Akamai, Vercel, nginx
/// or Fastly edges. Only use it after confirming the edge sets each header.
pub const DEFAULT_PROXY_HEADERS: &[&str] = &[
    "cf-connecting-ip",
    "true-client-ip",
    "x-real-ip",
    "x-client-ip",
    "fastly-client-ip",
    "x-forwarded-for",
];

/// Extract the client IP from the first trusted header that carries one.
///
/// `x-forwarded-for` contributes its first (client-most) entry. Values that
/// do not parse as an IP address are skipped.
pub fn client_ip<S: AsRef<str>>(headers: &HeaderMap, trusted: &[S]) -> Option<IpAddr> {
    for name in trusted {
        let name = name.as_ref();
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };

        let candidate = if name.eq_ignore_ascii_case("x-forwarded-for") {
            value.split(',').next().unwrap_or_default()
        } else {
            value
        };

        match candidate.trim().parse::<IpAddr>() {
            Ok(ip) => return Some(ip),
            Err(_) => debug!(header = name, "ignoring unparseable client IP header"),
        }
    }

    None
}
