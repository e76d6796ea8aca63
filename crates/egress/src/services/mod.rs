//! Services built on the safe outbound request path.

pub mod webhook;
