//! Address-level building blocks: strict literal parsing, range tables,
//! and client address extraction.

pub mod client_ip;
pub mod literal;
pub mod ranges;

pub use literal::{
    AddressClass, CanonicalV6, InvalidIpLiteral, IpLiteral, classify, expand_v6, is_ambiguous,
    parse_strict_v4, parse_strict_v6,
};
pub use ranges::{is_private, is_private_v4, is_private_v6};
