//! Configuration for discovery and publication
//!
//! - [`DiscoveryConfig`] - which store to talk to and which key to use
//! - [`ClientConfig`] - connection and request tuning
//! - [`TlsOptions`] - certificate material for TLS-secured clusters

mod client;
mod discovery;
mod tls;

pub use client::*;
pub use discovery::*;
pub use tls::*;

#[cfg(test)]
mod tls_test;
