//! hsrecon Tor Layer
//!
//! Provides Tor-based networking for hidden-service probes:
//! - SOCKS5h dialing with a bounded timeout (DNS resolution via Tor)
//! - HTTP clients routed through the proxy
//! - The onion spider that files crawl records

pub mod proxy;
pub mod spider;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use proxy::*;
pub use spider::*;
