//! Strict IP literal parsing and ambiguity detection.
//!
//! Only the strict textual grammars are accepted as addresses. Anything
//! numeric that falls outside them is flagged ambiguous, because a resolver
//! further down the line may still read it as an address (`0177.0.0.1`,
//! `2130706433`, `127.1`).

use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use thiserror::Error;

use crate::net::ranges;

/// An IPv6 address in canonical expanded form: eight 16-bit groups.
///
/// `Display` renders all eight groups as four lowercase hex digits. This
/// form exists for range matching; use [`IpLiteral`] for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalV6([u16; 8]);

impl CanonicalV6 {
    pub const fn from_groups(groups: [u16; 8]) -> Self {
        Self(groups)
    }

    pub const fn groups(&self) -> [u16; 8] {
        self.0
    }

    pub fn as_u128(&self) -> u128 {
        u128::from(Ipv6Addr::from(self.0))
    }

    /// The embedded IPv4 address of an IPv4-mapped address (`::ffff:0:0/96`).
    pub fn mapped_v4(&self) -> Option<[u8; 4]> {
        let g = self.0;
        if g[..5] != [0; 5] || g[5] != 0xffff {
            return None;
        }
        let [a, b] = g[6].to_be_bytes();
        let [c, d] = g[7].to_be_bytes();
        Some([a, b, c, d])
    }
}

impl fmt::Display for CanonicalV6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{group:04x}")?;
        }
        Ok(())
    }
}

/// A strictly parsed IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpLiteral {
    V4([u8; 4]),
    V6(CanonicalV6),
}

impl IpLiteral {
    pub fn is_v6(&self) -> bool {
        matches!(self, IpLiteral::V6(_))
    }

    /// Whether the address falls in a private, reserved, or special-use range.
    pub fn is_private(&self) -> bool {
        ranges::is_private(*self)
    }

    /// Host form for a URL authority: IPv6 wrapped in brackets.
    pub fn url_host(&self) -> String {
        match self {
            IpLiteral::V4(_) => self.to_string(),
            IpLiteral::V6(_) => format!("[{self}]"),
        }
    }
}

impl From<IpLiteral> for IpAddr {
    fn from(ip: IpLiteral) -> Self {
        match ip {
            IpLiteral::V4(octets) => IpAddr::V4(Ipv4Addr::from(octets)),
            IpLiteral::V6(v6) => IpAddr::V6(Ipv6Addr::from(v6.groups())),
        }
    }
}

impl From<IpAddr> for IpLiteral {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => IpLiteral::V4(v4.octets()),
            IpAddr::V6(v6) => IpLiteral::V6(CanonicalV6(v6.segments())),
        }
    }
}

impl fmt::Display for IpLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&IpAddr::from(*self), f)
    }
}

/// Text that is not a strict IPv4 or IPv6 literal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a strict IP literal: {0}")]
pub struct InvalidIpLiteral(pub String);

impl FromStr for IpLiteral {
    type Err = InvalidIpLiteral;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_strict_v4(s)
            .or_else(|| parse_strict_v6(s))
            .ok_or_else(|| InvalidIpLiteral(s.to_string()))
    }
}

/// How a host literal must be treated by the validator.
///
/// `Hostname` means the text is not an IP literal in any form and has to
/// be resolved before anything can be said about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    Public(IpLiteral),
    Private(IpLiteral),
    Ambiguous,
    Hostname,
}

/// Classify a host literal (IPv6 without brackets).
pub fn classify(host: &str) -> AddressClass {
    match parse_strict_v4(host).or_else(|| parse_strict_v6(host)) {
        Some(ip) if ip.is_private() => AddressClass::Private(ip),
        Some(ip) => AddressClass::Public(ip),
        None if is_ambiguous(host) => AddressClass::Ambiguous,
        None => AddressClass::Hostname,
    }
}

/// Parse four decimal octets with no leading zeros.
///
/// Hex (`0x7f.0.0.1`), octal (`0177.0.0.1`), integer (`2130706433`) and
/// partial (`127.1`) forms are rejected.
pub fn parse_strict_v4(text: &str) -> Option<IpLiteral> {
    let mut octets = [0u8; 4];
    let mut parts = text.split('.');
    for octet in &mut octets {
        *octet = parse_octet(parts.next()?)?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(IpLiteral::V4(octets))
}

fn parse_octet(part: &str) -> Option<u8> {
    if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse().ok()
}

/// Parse an IPv6 literal (no brackets, no zone ID).
pub fn parse_strict_v6(text: &str) -> Option<IpLiteral> {
    expand_v6(text).map(IpLiteral::V6)
}

/// Expand an IPv6 literal into its canonical eight-group form.
///
/// Two passes: a trailing dotted IPv4 part is first rewritten into two hex
/// groups (validated with [`parse_strict_v4`]), then `::` compression is
/// expanded.
pub fn expand_v6(text: &str) -> Option<CanonicalV6> {
    if !text.contains(':') {
        return None;
    }

    let normalized: Cow<'_, str> = match text.rsplit_once(':') {
        Some((prefix, tail)) if tail.contains('.') => {
            let IpLiteral::V4([a, b, c, d]) = parse_strict_v4(tail)? else {
                return None;
            };
            Cow::Owned(format!(
                "{prefix}:{:x}:{:x}",
                u16::from_be_bytes([a, b]),
                u16::from_be_bytes([c, d])
            ))
        }
        _ => Cow::Borrowed(text),
    };

    if normalized.contains('.') {
        return None;
    }

    expand_hex(&normalized).map(CanonicalV6)
}

fn expand_hex(text: &str) -> Option<[u16; 8]> {
    let mut groups = [0u16; 8];
    match text.split_once("::") {
        Some((head, tail)) => {
            if tail.contains("::") {
                return None;
            }
            let head = parse_groups(head)?;
            let tail = parse_groups(tail)?;
            // `::` stands for at least one zero group.
            if head.len() + tail.len() > 7 {
                return None;
            }
            groups[..head.len()].copy_from_slice(&head);
            groups[8 - tail.len()..].copy_from_slice(&tail);
        }
        None => {
            let all = parse_groups(text)?;
            if all.len() != 8 {
                return None;
            }
            groups.copy_from_slice(&all);
        }
    }
    Some(groups)
}

fn parse_groups(text: &str) -> Option<Vec<u16>> {
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split(':').map(parse_group).collect()
}

fn parse_group(group: &str) -> Option<u16> {
    if group.is_empty() || group.len() > 4 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(group, 16).ok()
}

/// Whether a hostname is numeric enough to be reinterpreted as an address.
///
/// Strict IPs are never ambiguous: the strict parsers already classify them.
pub fn is_ambiguous(host: &str) -> bool {
    if host.is_empty() || parse_strict_v4(host).is_some() || parse_strict_v6(host).is_some() {
        return false;
    }

    // Integer form
    if is_digits(host) {
        return true;
    }

    // Hex, optionally dotted (0x7f000001, 0x7f.0.0.1)
    if let Some(rest) = host.strip_prefix("0x").or_else(|| host.strip_prefix("0X"))
        && rest.bytes().all(|b| b.is_ascii_hexdigit() || b == b'.')
    {
        return true;
    }

    // Partial or octal dotted forms (127.1, 0177.0.0.1)
    if host.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return true;
    }

    // Numeric TLD (example.123)
    host.rsplit('.').next().is_some_and(is_digits)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn strict_v4_accepts_canonical_dotted_quads() {
        for (text, octets) in [
            ("0.0.0.0", [0, 0, 0, 0]),
            ("8.8.8.8", [8, 8, 8, 8]),
            ("127.0.0.1", [127, 0, 0, 1]),
            ("255.255.255.255", [255, 255, 255, 255]),
            ("10.20.30.40", [10, 20, 30, 40]),
        ] {
            assert_eq!(parse_strict_v4(text), Some(IpLiteral::V4(octets)), "{text}");
            assert_eq!(IpLiteral::V4(octets).to_string(), text);
        }
    }

    #[test]
    fn strict_v4_rejects_loose_forms() {
        for text in [
            "127.1",
            "1.2.3",
            "1.2.3.4.5",
            "0177.0.0.1",
            "01.2.3.4",
            "0x7f.0.0.1",
            "0x7f000001",
            "2130706433",
            "256.0.0.1",
            "1.2.3.-4",
            "1.2.3.+4",
            "1..2.3",
            "1.2.3.4.",
            "",
            " 1.2.3.4",
        ] {
            assert_eq!(parse_strict_v4(text), None, "{text}");
        }
    }

    #[test]
    fn strict_v6_accepts_standard_forms() {
        assert_eq!(
            parse_strict_v6("::1"),
            Some(IpLiteral::V6(CanonicalV6::from_groups([0, 0, 0, 0, 0, 0, 0, 1])))
        );
        assert!(parse_strict_v6("::").is_some());
        assert!(parse_strict_v6("2001:db8::1").is_some());
        assert!(parse_strict_v6("fe80::").is_some());
        assert!(parse_strict_v6("2606:4700:4700:0000:0000:0000:0000:1111").is_some());
        assert!(parse_strict_v6("1:2:3:4:5:6:7::").is_some());
        assert!(parse_strict_v6("::ffff:1.2.3.4").is_some());
        assert!(parse_strict_v6("64:ff9b::192.0.2.33").is_some());
        assert!(parse_strict_v6("2001:DB8::ABCD").is_some());
    }

    #[test]
    fn strict_v6_rejects_malformed_forms() {
        for text in [
            "1:2:3:4:5:6:7:8:9",
            "1:2:3:4:5:6:7",
            "1::2::3",
            ":::",
            ":1:2:3:4:5:6:7",
            "1:2:3:4:5:6:7:8::",
            "12345::1",
            "g::1",
            "::ffff:1.2.3",
            "::ffff:01.2.3.4",
            "1.2.3.4::",
            "1.2.3.4",
            "fe80::1%eth0",
            "",
        ] {
            assert_eq!(parse_strict_v6(text), None, "{text}");
        }
    }

    #[test]
    fn expand_produces_eight_lowercase_groups() {
        let expanded = expand_v6("2001:DB8::A").unwrap();
        assert_eq!(expanded.to_string(), "2001:0db8:0000:0000:0000:0000:0000:000a");
        assert_eq!(
            expand_v6("::").unwrap().to_string(),
            "0000:0000:0000:0000:0000:0000:0000:0000"
        );
    }

    #[test]
    fn expand_rewrites_mapped_ipv4_suffix() {
        let expanded = expand_v6("::ffff:127.0.0.1").unwrap();
        assert_eq!(expanded.to_string(), "0000:0000:0000:0000:0000:ffff:7f00:0001");
        assert_eq!(expanded.mapped_v4(), Some([127, 0, 0, 1]));
        assert!(ranges::is_private_v4(expanded.mapped_v4().unwrap()));
    }

    #[test]
    fn display_uses_compressed_form() {
        let ip = parse_strict_v6("2001:0db8:0000:0000:0000:0000:0000:0001").unwrap();
        assert_eq!(ip.to_string(), "2001:db8::1");
        assert_eq!(ip.url_host(), "[2001:db8::1]");
        assert_eq!(parse_strict_v4("1.2.3.4").unwrap().url_host(), "1.2.3.4");
    }

    #[test]
    fn ambiguous_hosts_are_flagged() {
        for host in [
            "127.1",
            "0177.0.0.1",
            "2130706433",
            "0x7f000001",
            "0X7F000001",
            "0x7f.0.0.1",
            "example.123",
            "1.2.3",
            "127.0.0.1.",
        ] {
            assert!(is_ambiguous(host), "{host}");
        }
    }

    #[test]
    fn strict_ips_and_names_are_not_ambiguous() {
        for host in ["example.com", "8.8.8.8", "127.0.0.1", "::1", "api.1password.com", "", "x.com."] {
            assert!(!is_ambiguous(host), "{host}");
        }
    }

    #[test]
    fn classify_covers_every_class() {
        assert_eq!(classify("8.8.8.8"), AddressClass::Public(IpLiteral::V4([8, 8, 8, 8])));
        assert_eq!(classify("10.0.0.1"), AddressClass::Private(IpLiteral::V4([10, 0, 0, 1])));
        assert!(matches!(classify("::1"), AddressClass::Private(_)));
        assert_eq!(classify("0x7f000001"), AddressClass::Ambiguous);
        assert_eq!(classify("example.com"), AddressClass::Hostname);
    }

    #[test]
    fn from_str_is_strict() {
        assert_eq!("1.1.1.1".parse::<IpLiteral>(), Ok(IpLiteral::V4([1, 1, 1, 1])));
        assert!("2001:4860:4860::8888".parse::<IpLiteral>().is_ok());
        assert!("127.1".parse::<IpLiteral>().is_err());
    }

    #[test]
    fn converts_to_std_ip_addr() {
        let ip: IpAddr = parse_strict_v6("::ffff:8.8.8.8").unwrap().into();
        assert_eq!(ip, "::ffff:8.8.8.8".parse::<IpAddr>().unwrap());
        let back = IpLiteral::from(ip);
        assert_eq!(back.to_string(), "::ffff:8.8.8.8");
    }
}
