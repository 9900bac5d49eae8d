//! proxyip - Proxy IP checker
//!
//! Validates candidate proxies by probing a reference service through each one
//! over TLS and comparing the observed exit IP with the direct one.

pub mod error;
pub mod proxy;

pub use error::ProbeError;
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
