//! Client-side service discovery and ephemeral registration on top of a
//! strongly consistent coordination store.
//!
//! Provides two independent facilities that share one connection per
//! endpoint set:
//! - [`Registry`] - watch a key prefix and mirror it into a local membership
//!   view, with incremental add/remove notifications
//! - [`Publisher`] - publish a key/value pair bound to a renewable lease, so
//!   the entry disappears when the publishing process dies
//!
//! # Basic Usage
//! ```no_run
//! use std::sync::Arc;
//! use roster::{FnListener, Publisher, Registry};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new();
//!     let endpoints = vec!["node1:9081".to_string(), "node2:9082".to_string()];
//!
//!     // Mirror every instance registered under "svc/users".
//!     let listener = Arc::new(FnListener::new(
//!         |kv| println!("up: {} -> {}", kv.key, kv.value),
//!         |kv| println!("down: {}", kv.key),
//!     ));
//!     registry.monitor(&endpoints, "svc/users", listener).await?;
//!
//!     // Announce ourselves under the same prefix.
//!     let publisher = Publisher::new(
//!         registry.clone(),
//!         endpoints,
//!         "svc/users".into(),
//!         "10.0.0.9:8080".into(),
//!     );
//!     publisher.keep_alive().await?;
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod constants;
mod errors;
mod proto;
mod publisher;
mod registry;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use publisher::*;
pub use registry::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
