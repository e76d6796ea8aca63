//! Private, reserved, and special-use address ranges.
//!
//! Plain CIDR tables. An address in any of these ranges is never a
//! legitimate destination for a user-supplied URL.

use crate::net::literal::{CanonicalV6, IpLiteral};

const PRIVATE_V4: &[([u8; 4], u8)] = &[
    ([0, 0, 0, 0], 8),       // "this" network
    ([10, 0, 0, 0], 8),      // RFC 1918
    ([100, 64, 0, 0], 10),   // CGNAT shared address space
    ([127, 0, 0, 0], 8),     // loopback
    ([169, 254, 0, 0], 16),  // link-local, cloud metadata
    ([172, 16, 0, 0], 12),   // RFC 1918
    ([192, 0, 0, 0], 24),    // IETF protocol assignments
    ([192, 0, 2, 0], 24),    // TEST-NET-1
    ([192, 88, 99, 0], 24),  // 6to4 relay anycast
    ([192, 168, 0, 0], 16),  // RFC 1918
    ([198, 18, 0, 0], 15),   // benchmarking
    ([198, 51, 100, 0], 24), // TEST-NET-2
    ([203, 0, 113, 0], 24),  // TEST-NET-3
    ([224, 0, 0, 0], 3),     // multicast 224/4, reserved 240/4, broadcast
];

const PRIVATE_V6: &[([u16; 8], u8)] = &[
    ([0, 0, 0, 0, 0, 0, 0, 1], 128),          // loopback
    ([0, 0, 0, 0, 0, 0, 0, 0], 128),          // unspecified
    ([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10),      // link-local
    ([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7),       // unique local
    ([0x2001, 0x0db8, 0, 0, 0, 0, 0, 0], 32), // documentation
    ([0xff00, 0, 0, 0, 0, 0, 0, 0], 8),       // multicast
];

/// Whether an IPv4 address is private, reserved, or special-use.
pub fn is_private_v4(octets: [u8; 4]) -> bool {
    let addr = u32::from_be_bytes(octets);
    PRIVATE_V4.iter().any(|&(network, prefix)| {
        let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
        addr & mask == u32::from_be_bytes(network) & mask
    })
}

/// Whether an IPv6 address is private, reserved, or special-use.
///
/// IPv4-mapped addresses (`::ffff:0:0/96`) are judged by their embedded
/// IPv4 address.
pub fn is_private_v6(addr: &CanonicalV6) -> bool {
    if let Some(v4) = addr.mapped_v4() {
        return is_private_v4(v4);
    }

    let value = addr.as_u128();
    PRIVATE_V6.iter().any(|&(network, prefix)| {
        let network = CanonicalV6::from_groups(network).as_u128();
        let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
        value & mask == network & mask
    })
}

pub fn is_private(ip: IpLiteral) -> bool {
    match ip {
        IpLiteral::V4(octets) => is_private_v4(octets),
        IpLiteral::V6(v6) => is_private_v6(&v6),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::net::literal::{expand_v6, parse_strict_v4};

    fn v4(text: &str) -> [u8; 4] {
        match parse_strict_v4(text) {
            Some(IpLiteral::V4(octets)) => octets,
            _ => panic!("not a strict IPv4 literal: {text}"),
        }
    }

    fn v6(text: &str) -> CanonicalV6 {
        expand_v6(text).unwrap()
    }

    #[test]
    fn private_v4_table_members() {
        for ip in [
            "0.0.0.0",
            "0.255.255.255",
            "10.0.0.1",
            "100.64.0.1",
            "100.127.255.254",
            "127.0.0.1",
            "169.254.1.1",
            "169.254.169.254",
            "172.16.0.1",
            "172.31.255.255",
            "192.0.0.8",
            "192.0.2.1",
            "192.88.99.1",
            "192.168.1.1",
            "198.18.0.1",
            "198.19.255.254",
            "198.51.100.7",
            "203.0.113.9",
            "224.0.0.1",
            "239.255.255.250",
            "240.0.0.1",
            "255.255.255.255",
        ] {
            assert!(is_private_v4(v4(ip)), "{ip}");
        }
    }

    #[test]
    fn public_v4_addresses() {
        for ip in [
            "8.8.8.8",
            "1.1.1.1",
            "100.63.255.255",
            "100.128.0.1",
            "172.15.255.255",
            "172.32.0.1",
            "192.0.3.1",
            "192.169.0.1",
            "198.17.255.255",
            "198.20.0.1",
            "203.0.114.1",
            "223.255.255.255",
        ] {
            assert!(!is_private_v4(v4(ip)), "{ip}");
        }
    }

    #[test]
    fn private_v6_table_members() {
        for ip in [
            "::1",
            "::",
            "fe80::1",
            "febf:ffff::1",
            "fc00::1",
            "fd12:3456::1",
            "2001:db8::1",
            "ff02::1",
        ] {
            assert!(is_private_v6(&v6(ip)), "{ip}");
        }
    }

    #[test]
    fn public_v6_addresses() {
        for ip in ["2001:4860:4860::8888", "2606:4700:4700::1111", "fec0::1", "2001:db9::1"] {
            assert!(!is_private_v6(&v6(ip)), "{ip}");
        }
    }

    #[test]
    fn mapped_v6_defers_to_v4_table() {
        assert!(is_private_v6(&v6("::ffff:127.0.0.1")));
        assert!(is_private_v6(&v6("::ffff:10.0.0.1")));
        assert!(is_private_v6(&v6("::ffff:169.254.169.254")));
        assert!(is_private_v6(&v6("::ffff:7f00:1")));
        assert!(!is_private_v6(&v6("::ffff:8.8.8.8")));
    }

    #[test]
    fn dispatch_by_family() {
        assert!(is_private(IpLiteral::V4([192, 168, 0, 1])));
        assert!(!is_private(IpLiteral::V4([8, 8, 4, 4])));
        assert!(is_private(IpLiteral::V6(v6("fd00::1"))));
    }
}
